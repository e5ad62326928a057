//! boxwright のビルドエンジン
//!
//! ビルド定義と [`RuntimeClient`](boxwright_container::RuntimeClient) を受け取り、
//! 作業コンテナの作成、ステップの適用、イメージの公開、後片付けまでを駆動する。

pub mod container;
pub mod context;
pub mod engine;
pub mod error;
pub mod progress;
pub mod step;

pub use container::{BuildContainer, ContainerState};
pub use context::BuildContext;
pub use engine::{BuildEngine, BuildOutcome};
pub use error::{BuildError, BuildResult, CleanupError};
pub use progress::BuildProgress;
pub use step::StepFailure;
