//! 出力イメージ定義

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 出力イメージのメタデータ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputImage {
    /// イメージ名（`name` または `name:tag`）
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// イメージのラベルとして付与されるプロパティ
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl OutputImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// リポジトリ名とタグに分割
    ///
    /// レジストリのポート指定（`localhost:5000/app`）はタグとして扱わない。
    ///
    /// 例: "my-image:1.0" -> ("my-image", "1.0")
    ///     "my-image" -> ("my-image", "latest")
    pub fn repo_and_tag(&self) -> (&str, &str) {
        split_image_tag(&self.name)
    }
}

/// イメージ参照をリポジトリとタグに分割（タグ省略時は latest）
///
/// ダイジェスト指定（`name@sha256:...`）は分割せず、タグを空で返す。
pub fn split_image_tag(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].rfind(':') {
        Some(offset) => {
            let idx = last_segment_start + offset;
            (&image[..idx], &image[idx + 1..])
        }
        None => (image, "latest"),
    }
}
