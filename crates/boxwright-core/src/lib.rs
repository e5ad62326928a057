//! boxwright core
//!
//! ビルド定義（base イメージ、プロビジョニングステップ、出力イメージ）の
//! データモデルと、YAML/JSON からの読み込み・検証を提供します。

pub mod error;
pub mod loader;
pub mod model;

pub use error::{Result, SpecError};
pub use loader::{SpecSource, load_build_spec, parse_build_spec};
pub use model::*;
