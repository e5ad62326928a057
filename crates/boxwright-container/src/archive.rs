//! ファイル転送用アーカイブ
//!
//! Docker のアップロード API は tar（gzip 可）しか受け付けないため、
//! 転送対象を宛先名で1エントリにまとめる。

use crate::error::{ContainerError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::{Path, PathBuf};
use tar::Builder;

/// 転送先を (親ディレクトリ, エントリ名) に分解
///
/// 宛先が `/` で終わる場合はディレクトリとみなし、転送元の名前を引き継ぐ。
pub fn split_destination(local: &Path, remote: &Path) -> Result<(PathBuf, String)> {
    let remote_str = remote.to_string_lossy();
    let invalid = |message: &str| ContainerError::TransferFailed {
        path: remote_str.to_string(),
        message: message.to_string(),
    };

    if !remote.is_absolute() {
        return Err(invalid("転送先は絶対パスで指定してください"));
    }

    let target = if remote_str.ends_with('/') {
        let name = local
            .file_name()
            .ok_or_else(|| invalid("転送元のファイル名を決定できません"))?;
        remote.join(name)
    } else {
        remote.to_path_buf()
    };

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| invalid("ルートディレクトリには転送できません"))?;
    let parent = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    Ok((parent, name))
}

/// ファイルまたはディレクトリを `entry_name` として tar.gz に固める
pub fn archive_path(local: &Path, entry_name: &str) -> Result<Vec<u8>> {
    tracing::debug!("Archiving {} as {}", local.display(), entry_name);

    let mut archive_data = Vec::new();
    {
        let encoder = GzEncoder::new(&mut archive_data, Compression::default());
        let mut tar = Builder::new(encoder);
        // リンク先の内容ではなくリンクそのものを格納する
        tar.follow_symlinks(false);

        if local.is_dir() {
            tar.append_dir_all(entry_name, local)?;
        } else if local.is_file() {
            tar.append_path_with_name(local, entry_name)?;
        } else {
            return Err(ContainerError::TransferFailed {
                path: local.display().to_string(),
                message: "転送元が存在しません".to_string(),
            });
        }

        tar.into_inner()?.finish()?;
    }

    tracing::debug!("Archive created: {} bytes", archive_data.len());
    Ok(archive_data)
}
