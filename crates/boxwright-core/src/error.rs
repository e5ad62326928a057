use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("ビルド定義ファイルが見つかりません: {0}")]
    NotFound(PathBuf),

    #[error("IO エラー: {path}\n理由: {message}")]
    Io { path: PathBuf, message: String },

    #[error("YAMLパースエラー: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSONパースエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base イメージが指定されていません")]
    MissingBaseImage,

    #[error("output.name が指定されていません")]
    MissingOutputName,

    #[error("ステップ {index} が不正です: {message}")]
    InvalidStep { index: usize, message: String },

    #[error("無効なビルド定義: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SpecError>;
