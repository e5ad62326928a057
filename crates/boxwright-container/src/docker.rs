//! Docker Engine API によるランタイム実装

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::archive::{archive_path, split_destination};
use crate::auth::RegistryAuth;
use crate::error::{ContainerError, Result, status_code};
use crate::image_config::ImageConfig;
use crate::runtime::{ContainerHandle, ExecOutput, ImageReference, RuntimeClient};
use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::query_parameters::{
    CommitContainerOptionsBuilder, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions,
};
use bollard::{API_DEFAULT_VERSION, Docker};
use boxwright_config::{Endpoint, ResolvedRemote};
use boxwright_core::{OutputImage, split_image_tag};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 作業コンテナに付与するラベル（取り残されたコンテナの発見用）
pub const BUILD_LABEL: &str = "boxwright.build-container";

/// exec 用にコンテナを起動し続けるためのエントリポイント
const KEEPALIVE: [&str; 3] = ["/bin/sh", "-c", "trap 'exit 0' TERM; while :; do sleep 3600; done"];

/// Docker デーモンに対する RuntimeClient
pub struct DockerRuntime {
    docker: Docker,
    remote: String,
    trusted: bool,
    auth: RegistryAuth,
    /// コンテナID -> 公開時に反映する設定
    pending: Mutex<HashMap<String, ImageConfig>>,
}

impl DockerRuntime {
    /// リモートに接続し、疎通と信頼状態を確認する
    pub async fn connect(remote: &ResolvedRemote) -> Result<Self> {
        let connection_failed = |e: bollard::errors::Error| ContainerError::ConnectionFailed {
            remote: remote.name.clone(),
            message: e.to_string(),
        };

        let timeout = remote.timeout_secs;
        let docker = match &remote.endpoint {
            Endpoint::LocalDefaults => Docker::connect_with_local_defaults()
                .map(|d| d.with_timeout(Duration::from_secs(timeout))),
            Endpoint::Unix(path) => {
                Docker::connect_with_unix(&path.to_string_lossy(), timeout, API_DEFAULT_VERSION)
            }
            Endpoint::Tcp(addr) => {
                Docker::connect_with_http(&format!("tcp://{}", addr), timeout, API_DEFAULT_VERSION)
            }
            Endpoint::Tls { addr, tls } => Docker::connect_with_ssl(
                &format!("tcp://{}", addr),
                &tls.key,
                &tls.cert,
                &tls.ca,
                timeout,
                API_DEFAULT_VERSION,
            ),
        }
        .map_err(connection_failed)?;

        debug!("Pinging remote {}", remote.name);
        docker.ping().await.map_err(connection_failed)?;

        let trusted = match &remote.endpoint {
            Endpoint::LocalDefaults | Endpoint::Unix(_) | Endpoint::Tls { .. } => true,
            Endpoint::Tcp(_) => remote.trust_insecure,
        };
        if trusted && matches!(remote.endpoint, Endpoint::Tcp(_)) {
            warn!(
                "Remote '{}' uses plain TCP and is trusted by configuration",
                remote.name
            );
        }

        info!(remote = %remote.name, trusted, "Connected to daemon");
        Ok(Self::with_docker(docker, &remote.name, trusted))
    }

    /// 接続し、信頼されていなければ拒否する
    pub async fn connect_trusted(remote: &ResolvedRemote) -> Result<Self> {
        let runtime = Self::connect(remote).await?;
        if !runtime.trusted {
            return Err(ContainerError::Untrusted(remote.name.clone()));
        }
        Ok(runtime)
    }

    /// 既存の接続から作成
    pub fn with_docker(docker: Docker, remote: &str, trusted: bool) -> Self {
        Self {
            docker,
            remote: remote.to_string(),
            trusted,
            auth: RegistryAuth::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// ベースイメージが無ければ pull し、その設定を返す
    async fn prepare_base_image(&self, image: &str) -> Result<ImageConfig> {
        let inspect = match self.docker.inspect_image(image).await {
            Ok(inspect) => inspect,
            Err(e) if status_code(&e) == Some(404) => {
                self.pull_image(image).await?;
                self.docker.inspect_image(image).await?
            }
            Err(e) => return Err(e.into()),
        };

        let config = serde_json::to_value(&inspect.config).unwrap_or(serde_json::Value::Null);
        Ok(ImageConfig::from_image_config(&config))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (image_name, tag) = split_image_tag(image);
        info!("Pulling base image: {}", image);

        let credentials = self.auth.credentials_for(image)?;
        let options = bollard::image::CreateImageOptions {
            from_image: image_name,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(info) = stream.next().await {
            match info {
                Ok(bollard::models::CreateImageInfo {
                    status: Some(status),
                    ..
                }) => {
                    debug!("pull {}: {}", image, status);
                }
                Ok(_) => {}
                Err(e) if status_code(&e) == Some(404) => {
                    return Err(ContainerError::ImageNotFound {
                        image: image.to_string(),
                    });
                }
                Err(e) => {
                    return Err(ContainerError::PullFailed {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn pending_config<T>(
        &self,
        handle: &ContainerHandle,
        f: impl FnOnce(&mut ImageConfig) -> T,
    ) -> T {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(pending.entry(handle.id.clone()).or_default())
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn is_trusted(&self) -> bool {
        self.trusted
    }

    async fn create_container(&self, name: &str, base_image: &str) -> Result<ContainerHandle> {
        let image_config = self.prepare_base_image(base_image).await?;

        let mut labels = HashMap::new();
        labels.insert(BUILD_LABEL.to_string(), name.to_string());

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let config = Config {
            image: Some(base_image.to_string()),
            entrypoint: Some(KEEPALIVE.iter().map(|s| s.to_string()).collect()),
            labels: Some(labels),
            ..Default::default()
        };

        let response = match self.docker.create_container(Some(options), config).await {
            Ok(response) => response,
            Err(e) if status_code(&e) == Some(409) => {
                return Err(ContainerError::NameConflict {
                    container: name.to_string(),
                });
            }
            Err(e) if status_code(&e) == Some(404) => {
                return Err(ContainerError::ImageNotFound {
                    image: base_image.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let handle = ContainerHandle {
            name: name.to_string(),
            id: response.id,
            remote: self.remote.clone(),
        };
        self.pending_config(&handle, |config| *config = image_config);

        let started = self
            .docker
            .start_container(&handle.id, None::<StartContainerOptions>)
            .await
            .map_err(ContainerError::from);
        discard_on_failure(started, || self.destroy_container(&handle)).await?;
        debug!("Container started: {} ({})", handle.name, handle.id);

        Ok(handle)
    }

    async fn exec(&self, handle: &ContainerHandle, argv: &[String]) -> Result<ExecOutput> {
        let (env, user, workdir) = self.pending_config(handle, |config| {
            (
                config.exec_env(),
                config.user().map(String::from),
                config.workdir().map(String::from),
            )
        });

        let exec_config = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            env: if env.is_empty() { None } else { Some(env) },
            user,
            working_dir: workdir,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let message = self.docker.create_exec(&handle.id, exec_config).await?;

        let mut output = ExecOutput::default();
        match self
            .docker
            .start_exec(&message.id, Some(StartExecOptions::default()))
            .await?
        {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(msg) = stream.next().await {
                    match msg? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            let text = String::from_utf8_lossy(&message);
                            for line in text.lines() {
                                debug!(target: "boxwright::exec", "{}", line);
                            }
                            output.stdout.push_str(&text);
                        }
                        LogOutput::StdErr { message } => {
                            let text = String::from_utf8_lossy(&message);
                            for line in text.lines() {
                                debug!(target: "boxwright::exec", "{}", line);
                            }
                            output.stderr.push_str(&text);
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        // 出力ストリーム終了直後は終了コードが未確定のことがある
        let mut exit_code = None;
        for _ in 0..10 {
            let inspect = self.docker.inspect_exec(&message.id).await?;
            if inspect.running != Some(true) {
                exit_code = inspect.exit_code;
                if exit_code.is_some() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        output.exit_code = exit_code.unwrap_or(-1);

        Ok(output)
    }

    async fn push_file(
        &self,
        handle: &ContainerHandle,
        local: &Path,
        remote: &Path,
    ) -> Result<()> {
        let (parent, entry_name) = split_destination(local, remote)?;
        let parent_str = parent.to_string_lossy().to_string();

        let mkdir = self
            .exec(
                handle,
                &["mkdir".to_string(), "-p".to_string(), parent_str.clone()],
            )
            .await?;
        if !mkdir.success() {
            return Err(ContainerError::TransferFailed {
                path: parent_str,
                message: format!("mkdir に失敗しました: {}", mkdir.stderr_tail(3)),
            });
        }

        let local_owned = local.to_path_buf();
        let entry = entry_name.clone();
        let archive = tokio::task::spawn_blocking(move || archive_path(&local_owned, &entry))
            .await
            .map_err(|e| ContainerError::TransferFailed {
                path: local.display().to_string(),
                message: e.to_string(),
            })??;

        debug!(
            "Uploading {} -> {}/{} ({} bytes)",
            local.display(),
            parent_str,
            entry_name,
            archive.len()
        );

        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(archive));
        let options = UploadToContainerOptions {
            path: parent_str.clone(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(&handle.id, Some(options), Either::Left(body))
            .await
            .map_err(|e| ContainerError::TransferFailed {
                path: remote.display().to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn set_config(&self, handle: &ContainerHandle, key: &str, value: &str) -> Result<()> {
        debug!("Set config on {}: {}={}", handle.name, key, value);
        let limits = self.pending_config(handle, |config| {
            config.apply(key, value)?;
            Ok::<_, ContainerError>((config.memory_limit(), config.nano_cpus()))
        })?;

        if key.starts_with("limits.") {
            let (memory, nano_cpus) = limits;
            let update = bollard::models::ContainerUpdateBody {
                memory,
                // スワップ上限との整合エラーを避ける
                memory_swap: memory.map(|_| -1),
                nano_cpus,
                ..Default::default()
            };
            self.docker.update_container(&handle.id, update).await?;
            debug!("Resource limits updated on {}", handle.name);
        }
        Ok(())
    }

    async fn publish_image(
        &self,
        handle: &ContainerHandle,
        output: &OutputImage,
    ) -> Result<ImageReference> {
        let (repo, tag) = output.repo_and_tag();
        let changes = self.pending_config(handle, |config| config.commit_changes(output));
        debug!("Commit changes for {}:\n{}", handle.name, changes);

        let options = CommitContainerOptionsBuilder::default()
            .container(&handle.id)
            .repo(repo)
            .tag(tag)
            .comment("boxwright build")
            .changes(&changes)
            .pause(true)
            .build();
        self.docker
            .commit_container(options, bollard::models::ContainerConfig::default())
            .await?;

        let name = format!("{}:{}", repo, tag);
        let inspect = self.docker.inspect_image(&name).await;
        info!("Image published: {}", name);

        Ok(published_reference(name, inspect))
    }

    async fn destroy_container(&self, handle: &ContainerHandle) -> Result<()> {
        let result = self
            .docker
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle.id);

        match result {
            Ok(()) => {
                debug!("Container removed: {}", handle.name);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => {
                debug!("Container already absent: {}", handle.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// 失敗したら後始末を実行し、元のエラーを返す
async fn discard_on_failure<T, F, Fut>(result: Result<T>, discard: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if result.is_err() {
        if let Err(e) = discard().await {
            warn!("Failed to discard container after error: {}", e);
        }
    }
    result
}

/// commit 済みイメージの参照（ID が取れなくても公開は成功）
fn published_reference(
    name: String,
    inspect: std::result::Result<bollard::models::ImageInspect, bollard::errors::Error>,
) -> ImageReference {
    let id = match inspect {
        Ok(inspect) => inspect.id,
        Err(e) => {
            warn!("Image {} was committed but could not be inspected: {}", name, e);
            None
        }
    };
    ImageReference { name, id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxwright_config::RemotesConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_start_failure_discards_container() {
        let discarded = AtomicBool::new(false);
        let started: Result<()> = Err(ContainerError::DockerApiError("no such runtime".to_string()));

        let result = discard_on_failure(started, || async {
            discarded.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(discarded.load(Ordering::SeqCst));
        assert!(matches!(result, Err(ContainerError::DockerApiError(m)) if m == "no such runtime"));
    }

    #[tokio::test]
    async fn test_successful_start_keeps_container() {
        let discarded = AtomicBool::new(false);
        let result = discard_on_failure(Ok(7), || async {
            discarded.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(!discarded.load(Ordering::SeqCst));
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_discard_error_keeps_original_error() {
        let started: Result<()> = Err(ContainerError::DockerApiError("start failed".to_string()));
        let result = discard_on_failure(started, || async {
            Err(ContainerError::DockerApiError("remove failed".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ContainerError::DockerApiError(m)) if m == "start failed"));
    }

    #[test]
    fn test_published_reference_with_id() {
        let inspect = bollard::models::ImageInspect {
            id: Some("sha256:abc".to_string()),
            ..Default::default()
        };
        let reference = published_reference("web:1.0".to_string(), Ok(inspect));
        assert_eq!(reference.name, "web:1.0");
        assert_eq!(reference.id.as_deref(), Some("sha256:abc"));
    }

    #[test]
    fn test_inspect_failure_after_commit_is_not_an_error() {
        let error = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "inspect timed out".to_string(),
        };
        let reference = published_reference("web:1.0".to_string(), Err(error));
        assert_eq!(reference.name, "web:1.0");
        assert_eq!(reference.id, None);
    }

    #[tokio::test]
    #[ignore] // Docker接続が必要なため、通常のテストではスキップ
    async fn test_local_daemon_lifecycle() {
        let remote = RemotesConfig::default().resolve("local").unwrap();
        let runtime = DockerRuntime::connect_trusted(&remote).await.unwrap();

        let handle = runtime
            .create_container("boxwright-test-lifecycle", "alpine:3.19")
            .await
            .unwrap();
        runtime.set_config(&handle, "env.GREETING", "hi").await.unwrap();
        runtime
            .set_config(&handle, "limits.memory", "256MB")
            .await
            .unwrap();
        let inspect = runtime
            .docker
            .inspect_container(&handle.id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .unwrap();
        assert_eq!(
            inspect.host_config.and_then(|h| h.memory),
            Some(256 * 1024 * 1024)
        );

        let output = runtime
            .exec(
                &handle,
                &["/bin/sh".to_string(), "-c".to_string(), "echo $GREETING".to_string()],
            )
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hi");

        let reference = runtime
            .publish_image(&handle, &OutputImage::new("boxwright-test:latest"))
            .await
            .unwrap();
        assert_eq!(reference.name, "boxwright-test:latest");

        runtime.destroy_container(&handle).await.unwrap();
        // 2回目の削除もエラーにならない
        runtime.destroy_container(&handle).await.unwrap();

        runtime
            .docker
            .remove_image(
                "boxwright-test:latest",
                None::<bollard::query_parameters::RemoveImageOptions>,
                None,
            )
            .await
            .ok();
    }
}
