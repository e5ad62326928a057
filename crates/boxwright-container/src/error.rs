use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "デーモンに接続できません ({remote}): {message}\n\nヒント:\n  • Dockerデーモンが起動しているか確認してください\n  • --remote の指定と config.yml を確認してください"
    )]
    ConnectionFailed { remote: String, message: String },

    #[error(
        "リモート '{0}' への接続は信頼されていません\n\nヒント:\n  • TLS のクライアント証明書 (ca / cert / key) を設定してください\n  • 平文 TCP を使う場合は trust_insecure: true を明示してください"
    )]
    Untrusted(String),

    #[error("コンテナ '{container}' は既に存在します")]
    NameConflict { container: String },

    #[error("コンテナ '{container}' が見つかりません")]
    ContainerNotFound { container: String },

    #[error(
        "イメージ '{image}' が見つかりません\n\nヒント:\n  • イメージ名とタグを確認してください"
    )]
    ImageNotFound { image: String },

    #[error("イメージの取得に失敗しました ({image}): {message}")]
    PullFailed { image: String, message: String },

    #[error("未対応の設定キーです: {0}")]
    UnsupportedConfigKey(String),

    #[error("設定値が不正です ({key}): {message}")]
    InvalidConfigValue { key: String, message: String },

    #[error("ファイル転送に失敗しました ({path}): {message}")]
    TransferFailed { path: String, message: String },

    #[error("認証情報の取得に失敗しました ({registry}): {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        let err_str = err.to_string();
        // 接続エラーの可能性をチェック
        if err_str.contains("Connection refused") || err_str.contains("No such file or directory")
        {
            ContainerError::ConnectionFailed {
                remote: "docker".to_string(),
                message: err_str,
            }
        } else {
            ContainerError::DockerApiError(err_str)
        }
    }
}

/// HTTP ステータスコードを取り出す（404 / 409 の判定用）
pub(crate) fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
