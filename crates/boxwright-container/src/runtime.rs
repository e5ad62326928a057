use crate::error::Result;
use async_trait::async_trait;
use boxwright_core::OutputImage;
use std::fmt;
use std::path::Path;

/// コンテナランタイムのトレイト
///
/// ビルドエンジンはこの能力セットだけを通じてリモートデーモンを操作する。
/// 実装は複数のビルドから共有されても安全であること（再入可能）。
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// 接続先リモートの識別子
    fn remote(&self) -> &str;

    /// 接続がリモートに信頼されているか
    fn is_trusted(&self) -> bool;

    /// ベースイメージからコンテナを作成して起動する
    async fn create_container(&self, name: &str, base_image: &str) -> Result<ContainerHandle>;

    /// コンテナ内でコマンドを実行し、終了コードと出力を返す
    async fn exec(&self, handle: &ContainerHandle, argv: &[String]) -> Result<ExecOutput>;

    /// ローカルのファイル/ディレクトリをコンテナ内へ転送する
    async fn push_file(&self, handle: &ContainerHandle, local: &Path, remote: &Path)
    -> Result<()>;

    /// コンテナ設定を変更する（env.* / label.* / user / workdir / cmd / entrypoint / expose）
    async fn set_config(&self, handle: &ContainerHandle, key: &str, value: &str) -> Result<()>;

    /// コンテナのファイルシステムを新しいイメージとして公開する
    async fn publish_image(
        &self,
        handle: &ContainerHandle,
        output: &OutputImage,
    ) -> Result<ImageReference>;

    /// コンテナを削除する。既に存在しない場合も成功とする
    async fn destroy_container(&self, handle: &ContainerHandle) -> Result<()>;
}

/// 作成済みコンテナへの参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub id: String,
    pub remote: String,
}

/// コンテナ内コマンドの実行結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr の末尾 `lines` 行（エラー表示用）
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// 公開されたイメージへの参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// `repo:tag`
    pub name: String,
    pub id: Option<String>,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => {
                let short = id.trim_start_matches("sha256:");
                write!(f, "{} ({})", self.name, &short[..short.len().min(12)])
            }
            None => write!(f, "{}", self.name),
        }
    }
}
