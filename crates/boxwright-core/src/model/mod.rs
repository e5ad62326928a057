//! モデル定義
//!
//! ビルド定義を構成するデータモデル。
//! ロード後は読み取り専用として扱われます。

mod output;
mod spec;
mod step;

// Re-exports
pub use output::*;
pub use spec::*;
pub use step::*;
