//! ビルドエンジン
//!
//! 1回のビルドで作業コンテナを1つ作成し、ステップを順に適用してから
//! イメージとして公開する。結果に関わらず（keep 指定がなければ）コンテナは削除する。

use crate::container::{BuildContainer, ContainerState};
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult, CleanupError};
use crate::progress::BuildProgress;
use crate::step::apply_step;
use boxwright_container::{ImageReference, RuntimeClient};
use boxwright_core::{BuildSpec, SpecError};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// ビルドの最終結果
#[derive(Debug)]
pub struct BuildOutcome {
    /// 公開されたイメージ、または最初の致命的エラー
    pub result: BuildResult<ImageReference>,
    /// 作業コンテナの最終状態（作成された場合）
    pub container: Option<BuildContainer>,
    /// keep 指定によりコンテナを残したか
    pub retained: bool,
    /// 削除の失敗。result は上書きしない
    pub cleanup_error: Option<CleanupError>,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn image(&self) -> Option<&ImageReference> {
        self.result.as_ref().ok()
    }
}

pub struct BuildEngine {
    spec: Arc<BuildSpec>,
    client: Arc<dyn RuntimeClient>,
    remote: String,
    context: BuildContext,
    cancel: CancellationToken,
    progress: Option<BuildProgress>,
}

impl BuildEngine {
    /// エンジンを組み立てる。I/O は行わない
    pub fn new(
        spec: impl Into<Arc<BuildSpec>>,
        client: Arc<dyn RuntimeClient>,
        remote: impl Into<String>,
    ) -> BuildResult<Self> {
        let spec = spec.into();
        let remote = remote.into();

        spec.validate()?;
        if remote.trim().is_empty() {
            return Err(SpecError::Invalid("リモートが指定されていません".to_string()).into());
        }

        Ok(Self {
            spec,
            client,
            remote,
            context: BuildContext::default(),
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    /// copy ステップのソースを解決するディレクトリ
    pub fn with_context(mut self, root: impl Into<PathBuf>) -> Self {
        self.context = BuildContext::new(root);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: BuildProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn spec(&self) -> &BuildSpec {
        &self.spec
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// ビルドを実行する
    ///
    /// エラーは返さず、結果・コンテナの最終状態・削除の失敗を
    /// まとめた [`BuildOutcome`] を返す。
    pub async fn execute(&self, keep_container: bool) -> BuildOutcome {
        let mut container = BuildContainer::new(BuildContainer::generate_name(), &self.remote);
        info!(
            container = %container.name,
            remote = %self.remote,
            "Building {} from {}",
            self.spec.output.name,
            self.spec.base_image
        );

        let result = self.run(&mut container).await;
        match &result {
            Ok(reference) => info!("Published {}", reference),
            Err(e) => warn!(container = %container.name, "Build failed: {}", e),
        }

        let created = container.handle().is_some();
        // 存在が確認できないコンテナは keep 指定でも残さない
        let retained = keep_container && container.is_confirmed();
        let mut cleanup_error = None;

        if retained {
            info!(
                container = %container.name,
                "作業コンテナを保持します（状態: {}）",
                container.state()
            );
        } else if created {
            if let Err(e) = self.teardown(&mut container).await {
                warn!("{}", e);
                cleanup_error = Some(e);
            }
        }

        if let Some(progress) = &self.progress {
            match &result {
                Ok(reference) => progress.finish_success(&reference.to_string()),
                Err(e) => progress.finish_error(&e.to_string()),
            }
        }

        BuildOutcome {
            result,
            container: created.then_some(container),
            retained,
            cleanup_error,
        }
    }

    async fn run(&self, container: &mut BuildContainer) -> BuildResult<ImageReference> {
        if !self.client.is_trusted() {
            return Err(BuildError::Connection {
                remote: self.remote.clone(),
                message: "接続が信頼されていません".to_string(),
            });
        }

        // 作成
        self.report("Creating container");
        let created = self
            .cancellable(
                self.client
                    .create_container(&container.name, &self.spec.base_image),
            )
            .await;
        let handle = match created {
            Ok(result) => result.map_err(BuildError::ContainerCreation)?,
            Err(cancelled) => {
                // 作成要求が途中まで進んでいる可能性があるため名前で削除を試みる
                container.attach_unconfirmed()?;
                return Err(cancelled);
            }
        };
        debug!(container = %handle.name, id = %handle.id, "Container created");
        container.attach(handle.clone())?;

        // プロビジョニング
        container.advance(ContainerState::Provisioning)?;
        let total = self.spec.steps.len();
        for (index, step) in self.spec.steps.iter().enumerate() {
            let description = step.describe();
            info!(step = index, "{}", description);
            if let Some(progress) = &self.progress {
                progress.step(index, total, &description);
            }

            self.cancellable(apply_step(
                self.client.as_ref(),
                &handle,
                &self.context,
                index,
                step,
            ))
            .await??;
            container.advance(ContainerState::Provisioning)?;
        }
        container.advance(ContainerState::Provisioned)?;

        // 公開
        self.report(&format!("Publishing {}", self.spec.output.name));
        let reference = self
            .cancellable(self.client.publish_image(&handle, &self.spec.output))
            .await?
            .map_err(BuildError::Publish)?;
        container.advance(ContainerState::Published)?;

        Ok(reference)
    }

    /// 作業コンテナを削除する
    ///
    /// キャンセル後にも実行されるため、トークンとは競合させない。
    async fn teardown(&self, container: &mut BuildContainer) -> Result<(), CleanupError> {
        let Some(handle) = container.handle().cloned() else {
            return Ok(());
        };

        self.report("Removing container");
        debug!(container = %handle.name, "Destroying container");
        self.client
            .destroy_container(&handle)
            .await
            .map_err(|source| CleanupError {
                container: handle.name.clone(),
                source,
            })?;

        if let Err(e) = container.advance(ContainerState::Destroyed) {
            debug!("{}", e);
        }
        info!(container = %handle.name, "作業コンテナを削除しました");
        Ok(())
    }

    /// リモート呼び出しをキャンセルトークンと競合させる
    async fn cancellable<T>(&self, operation: impl Future<Output = T>) -> BuildResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BuildError::Cancelled),
            output = operation => Ok(output),
        }
    }

    fn report(&self, message: &str) {
        if let Some(progress) = &self.progress {
            progress.set_message(message);
        }
    }
}
