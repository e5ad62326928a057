//! プロビジョニングステップの実行

use crate::context::BuildContext;
use crate::error::BuildError;
use boxwright_container::{ContainerHandle, RuntimeClient};
use boxwright_core::{Step, StepKind};
use thiserror::Error;

/// 失敗時に表示する stderr の行数
const STDERR_TAIL_LINES: usize = 20;

/// ステップの失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step {index} ({kind}): {message}")]
pub struct StepFailure {
    pub index: usize,
    pub kind: StepKind,
    pub message: String,
}

impl From<StepFailure> for BuildError {
    fn from(failure: StepFailure) -> Self {
        BuildError::Step {
            index: failure.index,
            kind: failure.kind,
            message: failure.message,
        }
    }
}

/// 1つのステップを作業コンテナに適用する
pub(crate) async fn apply_step(
    client: &dyn RuntimeClient,
    handle: &ContainerHandle,
    context: &BuildContext,
    index: usize,
    step: &Step,
) -> Result<(), StepFailure> {
    let fail = |message: String| StepFailure {
        index,
        kind: step.kind(),
        message,
    };

    match step {
        Step::Run(command) => {
            let output = client
                .exec(handle, &command.to_argv())
                .await
                .map_err(|e| fail(e.to_string()))?;

            if !output.stdout.is_empty() {
                tracing::debug!(step = index, "stdout:\n{}", output.stdout.trim_end());
            }
            if !output.success() {
                let tail = output.stderr_tail(STDERR_TAIL_LINES);
                let message = if tail.is_empty() {
                    format!("exit code {}", output.exit_code)
                } else {
                    format!("exit code {}\n{}", output.exit_code, tail)
                };
                return Err(fail(message));
            }
        }
        Step::Copy { src, dest } => {
            let local = context.resolve(src).map_err(fail)?;
            client
                .push_file(handle, &local, dest)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }
        Step::Env { key, value } => {
            client
                .set_config(handle, &format!("env.{}", key), value)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }
        Step::Config { key, value } => {
            client
                .set_config(handle, key, value)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }
    }

    Ok(())
}
