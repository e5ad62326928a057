//! プロビジョニングステップ定義

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// プロビジョニングステップ
///
/// YAML形式：
/// ```yaml
/// steps:
///   - run: apt-get update
///   - run: ["useradd", "-m", "app"]
///   - copy: { src: app/, dest: /opt/app }
///   - env: { key: APP_ENV, value: production }
///   - config: { key: workdir, value: /opt/app }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub enum Step {
    /// コンテナ内でコマンドを実行
    Run(Command),
    /// ビルドコンテキストからファイル/ディレクトリをコピー
    Copy { src: PathBuf, dest: PathBuf },
    /// 環境変数を設定（以降のステップと出力イメージに反映）
    Env { key: String, value: String },
    /// コンテナ設定を変更
    Config { key: String, value: String },
}

/// 実行コマンド（shell形式 / exec形式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Shell(String),
    Exec(Vec<String>),
}

impl Command {
    /// コンテナに渡す argv に変換
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            Command::Shell(line) => vec!["/bin/sh".to_string(), "-c".to_string(), line.clone()],
            Command::Exec(argv) => argv.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Command::Shell(line) => line.trim().is_empty(),
            Command::Exec(argv) => argv.is_empty() || argv[0].is_empty(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Shell(line) => write!(f, "{}", line),
            Command::Exec(argv) => write!(f, "{}", argv.join(" ")),
        }
    }
}

/// ステップの種類（エラー表示・進捗表示用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    RunCommand,
    CopyFile,
    SetEnv,
    SetConfig,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::RunCommand => write!(f, "RunCommand"),
            StepKind::CopyFile => write!(f, "CopyFile"),
            StepKind::SetEnv => write!(f, "SetEnv"),
            StepKind::SetConfig => write!(f, "SetConfig"),
        }
    }
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Run(_) => StepKind::RunCommand,
            Step::Copy { .. } => StepKind::CopyFile,
            Step::Env { .. } => StepKind::SetEnv,
            Step::Config { .. } => StepKind::SetConfig,
        }
    }

    /// 人間向けの短い説明（例: `RunCommand apt-get update`）
    pub fn describe(&self) -> String {
        match self {
            Step::Run(command) => format!("{} {}", self.kind(), command),
            Step::Copy { src, dest } => {
                format!("{} {} -> {}", self.kind(), src.display(), dest.display())
            }
            Step::Env { key, value } | Step::Config { key, value } => {
                format!("{} {}={}", self.kind(), key, value)
            }
        }
    }

    /// 構造上の検証（コンテナに触れる前に弾けるもの）
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Step::Run(command) => {
                if command.is_empty() {
                    return Err("run コマンドが空です".to_string());
                }
            }
            Step::Copy { src, dest } => {
                if src.as_os_str().is_empty() {
                    return Err("copy.src が空です".to_string());
                }
                if !dest.is_absolute() {
                    return Err(format!(
                        "copy.dest は絶対パスで指定してください: {}",
                        dest.display()
                    ));
                }
            }
            Step::Env { key, .. } => {
                if key.is_empty() || key.contains('=') {
                    return Err(format!("環境変数名が不正です: '{}'", key));
                }
            }
            Step::Config { key, .. } => {
                if key.trim().is_empty() {
                    return Err("config.key が空です".to_string());
                }
            }
        }
        Ok(())
    }
}

/// YAML/JSON 上の表現。run/copy/env/config のいずれか1つだけを持つ
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    copy: Option<CopyArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    env: Option<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<KeyValue>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CopyArgs {
    src: PathBuf,
    dest: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyValue {
    key: String,
    value: String,
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let mut steps = Vec::with_capacity(1);
        if let Some(command) = raw.run {
            steps.push(Step::Run(command));
        }
        if let Some(CopyArgs { src, dest }) = raw.copy {
            steps.push(Step::Copy { src, dest });
        }
        if let Some(KeyValue { key, value }) = raw.env {
            steps.push(Step::Env { key, value });
        }
        if let Some(KeyValue { key, value }) = raw.config {
            steps.push(Step::Config { key, value });
        }

        match steps.len() {
            1 => Ok(steps.remove(0)),
            0 => Err("ステップには run / copy / env / config のいずれかを指定してください".to_string()),
            _ => Err("1つのステップに複数の操作が指定されています".to_string()),
        }
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        match step {
            Step::Run(command) => RawStep {
                run: Some(command),
                ..Default::default()
            },
            Step::Copy { src, dest } => RawStep {
                copy: Some(CopyArgs { src, dest }),
                ..Default::default()
            },
            Step::Env { key, value } => RawStep {
                env: Some(KeyValue { key, value }),
                ..Default::default()
            },
            Step::Config { key, value } => RawStep {
                config: Some(KeyValue { key, value }),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_argv() {
        let cmd = Command::Shell("apt-get update".to_string());
        assert_eq!(cmd.to_argv(), vec!["/bin/sh", "-c", "apt-get update"]);
    }

    #[test]
    fn test_exec_command_argv() {
        let cmd = Command::Exec(vec!["useradd".to_string(), "-m".to_string()]);
        assert_eq!(cmd.to_argv(), vec!["useradd", "-m"]);
    }

    #[test]
    fn test_step_kind_names() {
        let run = Step::Run(Command::Shell("true".to_string()));
        assert_eq!(run.kind().to_string(), "RunCommand");

        let copy = Step::Copy {
            src: PathBuf::from("a"),
            dest: PathBuf::from("/a"),
        };
        assert_eq!(copy.kind().to_string(), "CopyFile");
        assert_eq!(copy.describe(), "CopyFile a -> /a");
    }

    #[test]
    fn test_parse_step_variants() {
        let yaml = r#"
- run: apt-get update
- run: ["echo", "hi"]
- copy: { src: app, dest: /opt/app }
- env: { key: FOO, value: bar }
- config: { key: workdir, value: /opt/app }
"#;
        let steps: Vec<Step> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], Step::Run(Command::Shell("apt-get update".to_string())));
        assert_eq!(
            steps[1],
            Step::Run(Command::Exec(vec!["echo".to_string(), "hi".to_string()]))
        );
        assert_eq!(steps[3].kind(), StepKind::SetEnv);
        assert_eq!(steps[4].kind(), StepKind::SetConfig);
    }

    #[test]
    fn test_step_with_two_actions_is_rejected() {
        let yaml = "- run: ls\n  env: { key: A, value: b }\n";
        let result: Result<Vec<Step>, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_step_is_rejected() {
        let result: Result<Vec<Step>, _> = serde_json::from_str("[{}]");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_copy_requires_absolute_dest() {
        let step = Step::Copy {
            src: PathBuf::from("app"),
            dest: PathBuf::from("opt/app"),
        };
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_validate_env_key() {
        let step = Step::Env {
            key: "A=B".to_string(),
            value: "x".to_string(),
        };
        assert!(step.validate().is_err());
    }
}
