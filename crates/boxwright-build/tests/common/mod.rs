use async_trait::async_trait;
use boxwright_container::{
    ContainerError, ContainerHandle, ExecOutput, ImageConfig, ImageReference, Result,
    RuntimeClient,
};
use boxwright_core::{BuildSpec, OutputImage};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// ランタイムへの呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { name: String, base_image: String },
    Exec(Vec<String>),
    Push { remote: String },
    Config { key: String, value: String },
    Publish(String),
    Destroy(String),
}

#[derive(Default)]
pub struct FakeState {
    calls: Vec<Call>,
    /// コンテナ名 -> 適用された変更
    containers: BTreeMap<String, Vec<String>>,
    /// コンテナ名 -> 蓄積された設定（キーの検証に使う）
    configs: BTreeMap<String, ImageConfig>,
    /// イメージ名 -> 公開時点のコンテナの変更
    images: BTreeMap<String, Vec<String>>,
}

/// メモリ上のランタイム
#[derive(Default)]
pub struct FakeRuntime {
    pub untrusted: bool,
    /// この文字列を含むコマンドは exit code 100 で失敗する
    pub fail_command: Option<String>,
    /// create_container がこの名前を既存とみなす
    pub conflict: bool,
    pub fail_publish: bool,
    pub fail_destroy: bool,
    /// この文字列を含むコマンドの実行中にトークンをキャンセルし、応答を返さない
    pub cancel_on: Option<(String, CancellationToken)>,
    /// create_container の途中でトークンをキャンセルし、応答を返さない
    pub cancel_on_create: Option<CancellationToken>,
    pub state: Mutex<FakeState>,
}

#[allow(dead_code)]
impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count()
    }

    pub fn live_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    pub fn published(&self) -> BTreeMap<String, Vec<String>> {
        self.state.lock().unwrap().images.clone()
    }

    pub fn exec_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec(argv) => Some(argv.join(" ")),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn apply(&self, handle: &ContainerHandle, change: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let container = state.containers.get_mut(&handle.name).ok_or_else(|| {
            ContainerError::ContainerNotFound {
                container: handle.name.clone(),
            }
        })?;
        container.push(change);
        Ok(())
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    fn remote(&self) -> &str {
        "fake"
    }

    fn is_trusted(&self) -> bool {
        !self.untrusted
    }

    async fn create_container(&self, name: &str, base_image: &str) -> Result<ContainerHandle> {
        self.record(Call::Create {
            name: name.to_string(),
            base_image: base_image.to_string(),
        });
        if let Some(token) = &self.cancel_on_create {
            token.cancel();
            std::future::pending::<()>().await;
        }
        if self.conflict {
            return Err(ContainerError::NameConflict {
                container: name.to_string(),
            });
        }

        self.state
            .lock()
            .unwrap()
            .containers
            .insert(name.to_string(), vec![format!("from {}", base_image)]);
        Ok(ContainerHandle {
            name: name.to_string(),
            id: format!("id-{}", name),
            remote: "fake".to_string(),
        })
    }

    async fn exec(&self, handle: &ContainerHandle, argv: &[String]) -> Result<ExecOutput> {
        self.record(Call::Exec(argv.to_vec()));
        let line = argv.join(" ");

        if let Some((pattern, token)) = &self.cancel_on {
            if line.contains(pattern.as_str()) {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }

        if let Some(pattern) = &self.fail_command {
            if line.contains(pattern.as_str()) {
                return Ok(ExecOutput {
                    exit_code: 100,
                    stdout: String::new(),
                    stderr: format!("E: {} failed", pattern),
                });
            }
        }

        self.apply(handle, format!("run {}", line))?;
        Ok(ExecOutput::default())
    }

    async fn push_file(&self, handle: &ContainerHandle, _local: &Path, remote: &Path) -> Result<()> {
        self.record(Call::Push {
            remote: remote.display().to_string(),
        });
        self.apply(handle, format!("copy {}", remote.display()))
    }

    async fn set_config(&self, handle: &ContainerHandle, key: &str, value: &str) -> Result<()> {
        self.record(Call::Config {
            key: key.to_string(),
            value: value.to_string(),
        });
        self.state
            .lock()
            .unwrap()
            .configs
            .entry(handle.name.clone())
            .or_default()
            .apply(key, value)?;
        self.apply(handle, format!("config {}={}", key, value))
    }

    async fn publish_image(
        &self,
        handle: &ContainerHandle,
        output: &OutputImage,
    ) -> Result<ImageReference> {
        self.record(Call::Publish(output.name.clone()));
        if self.fail_publish {
            return Err(ContainerError::DockerApiError("commit failed".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        let snapshot = state
            .containers
            .get(&handle.name)
            .cloned()
            .unwrap_or_default();
        state.images.insert(output.name.clone(), snapshot);
        Ok(ImageReference {
            name: output.name.clone(),
            id: Some("sha256:0123456789abcdef".to_string()),
        })
    }

    async fn destroy_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.record(Call::Destroy(handle.name.clone()));
        if self.fail_destroy {
            return Err(ContainerError::DockerApiError("daemon went away".to_string()));
        }
        // 既に存在しない場合も成功
        let mut state = self.state.lock().unwrap();
        state.containers.remove(&handle.name);
        state.configs.remove(&handle.name);
        Ok(())
    }
}

#[allow(dead_code)]
pub fn parse_spec(yaml: &str) -> BuildSpec {
    boxwright_core::parse_build_spec(yaml, false).unwrap()
}
