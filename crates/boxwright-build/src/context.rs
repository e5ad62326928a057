use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 転送サイズの警告しきい値（500MB）
const MAX_TRANSFER_SIZE: u64 = 500 * 1024 * 1024;

/// CopyFile ステップのソースを解決するローカルのビルドコンテキスト
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new(".")
    }
}

impl BuildContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// コンテキスト内の相対パスを実パスに解決する
    ///
    /// 絶対パスとコンテキスト外を指すパスは拒否する。
    pub fn resolve(&self, src: &Path) -> Result<PathBuf, String> {
        if src.is_absolute() {
            return Err(format!(
                "コピー元はコンテキストからの相対パスで指定してください: {}",
                src.display()
            ));
        }

        let root = self.root.canonicalize().map_err(|e| {
            format!(
                "ビルドコンテキストを開けません: {} ({})",
                self.root.display(),
                e
            )
        })?;
        let resolved = root
            .join(src)
            .canonicalize()
            .map_err(|e| format!("コピー元が見つかりません: {} ({})", src.display(), e))?;

        if !resolved.starts_with(&root) {
            return Err(format!(
                "コピー元がビルドコンテキストの外を指しています: {}",
                src.display()
            ));
        }
        match escaping_link(&root, &resolved) {
            Ok(None) => {}
            Ok(Some(link)) => {
                return Err(format!(
                    "コピー元にビルドコンテキストの外を指すシンボリックリンクがあります: {}",
                    link.strip_prefix(&root).unwrap_or(&link).display()
                ));
            }
            Err(e) => {
                return Err(format!("コピー元を読み取れません: {} ({})", src.display(), e));
            }
        }

        match transfer_size(&resolved) {
            Ok(size) => check_transfer_size(&resolved, size),
            Err(e) => tracing::debug!("Failed to measure {}: {}", resolved.display(), e),
        }

        Ok(resolved)
    }
}

/// ディレクトリ内でコンテキストの外を指すシンボリックリンクを探す
///
/// リンク先が存在しないリンクはそのまま転送されるため対象外。
fn escaping_link(root: &Path, path: &Path) -> io::Result<Option<PathBuf>> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(match path.canonicalize() {
            Ok(target) if !target.starts_with(root) => Some(path.to_path_buf()),
            _ => None,
        });
    }
    if metadata.is_dir() {
        for entry in fs::read_dir(path)? {
            if let Some(link) = escaping_link(root, &entry?.path())? {
                return Ok(Some(link));
            }
        }
    }
    Ok(None)
}

fn transfer_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    for entry in fs::read_dir(path)? {
        total += transfer_size(&entry?.path())?;
    }
    Ok(total)
}

/// 転送サイズのチェックと警告
fn check_transfer_size(path: &Path, size: u64) {
    if size > MAX_TRANSFER_SIZE {
        tracing::warn!(
            "警告: 転送するファイルが大きすぎます（{}: {}MB）",
            path.display(),
            size / 1024 / 1024
        );
    }
}
