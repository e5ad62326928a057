use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "リモート '{0}' が見つかりません\n\nヒント:\n  • config.yml の remotes に定義してください\n  • unix:// / tcp:// / https:// のアドレスを直接指定することもできます"
    )]
    UnknownRemote(String),

    #[error("リモート '{remote}' の設定が不正です: {message}")]
    InvalidRemote { remote: String, message: String },

    #[error("設定ファイルのパースに失敗しました: {path}\n理由: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
