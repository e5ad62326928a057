use crate::container::ContainerState;
use boxwright_container::ContainerError;
use boxwright_core::{SpecError, StepKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("無効なビルド定義: {0}")]
    Specification(#[from] SpecError),

    #[error("リモート '{remote}' に接続できません: {message}")]
    Connection { remote: String, message: String },

    #[error("作業コンテナの作成に失敗しました: {0}")]
    ContainerCreation(#[source] ContainerError),

    #[error("ステップ {index} ({kind}) が失敗しました: {message}")]
    Step {
        index: usize,
        kind: StepKind,
        message: String,
    },

    #[error("イメージの公開に失敗しました: {0}")]
    Publish(#[source] ContainerError),

    #[error("ビルドがキャンセルされました")]
    Cancelled,

    #[error("不正な状態遷移です: {from} -> {to}")]
    InvalidTransition {
        from: ContainerState,
        to: ContainerState,
    },
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::Step {
                index,
                kind,
                message,
            } => {
                format!(
                    "ステップ {} ({}) が失敗しました\n\
                     \n\
                     {}\n\
                     \n\
                     以降のステップは実行されていません。",
                    index, kind, message
                )
            }
            BuildError::ContainerCreation(ContainerError::NameConflict { container }) => {
                format!(
                    "作業コンテナ名 '{}' が既に使われています\n\
                     \n\
                     前回のビルドの残りであれば削除してから再実行してください。",
                    container
                )
            }
            BuildError::Connection { remote, message } => {
                format!(
                    "リモート '{}' を使用できません: {}\n\
                     \n\
                     --remote の指定と config.yml を確認してください。",
                    remote, message
                )
            }
            _ => format!("{}", self),
        }
    }

    /// 失敗したステップの (index, kind)
    pub fn failed_step(&self) -> Option<(usize, StepKind)> {
        match self {
            BuildError::Step { index, kind, .. } => Some((*index, *kind)),
            _ => None,
        }
    }
}

/// 作業コンテナの削除失敗
///
/// ビルド結果とは別に報告され、結果を上書きしない。
#[derive(Debug, Error)]
#[error("作業コンテナ '{container}' の削除に失敗しました: {source}")]
pub struct CleanupError {
    pub container: String,
    pub source: ContainerError,
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_message() {
        let err = BuildError::Step {
            index: 0,
            kind: StepKind::RunCommand,
            message: "exit code 100".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ステップ 0 (RunCommand) が失敗しました: exit code 100"
        );
        assert_eq!(err.failed_step(), Some((0, StepKind::RunCommand)));
        assert!(err.user_message().contains("以降のステップは実行されていません"));
    }

    #[test]
    fn test_non_step_error_has_no_failed_step() {
        assert_eq!(BuildError::Cancelled.failed_step(), None);
    }
}
