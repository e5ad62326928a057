//! ビルド定義ローダー
//!
//! ファイルまたは生の文字列（標準入力など）からビルド定義を読み込み、検証する

use crate::error::{Result, SpecError};
use crate::model::BuildSpec;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// ビルド定義の入力元
#[derive(Debug, Clone)]
pub enum SpecSource {
    /// ファイルパス（拡張子 .json なら JSON、それ以外は YAML）
    Path(PathBuf),
    /// 生の内容（標準入力から読んだものなど）
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

/// ビルド定義を読み込んで検証
#[instrument(skip(source))]
pub fn load_build_spec(source: SpecSource) -> Result<BuildSpec> {
    let (content, format) = match source {
        SpecSource::Path(path) => {
            let content = read_spec_file(&path)?;
            (content, format_for_path(&path))
        }
        SpecSource::Raw(content) => {
            let format = sniff_format(&content);
            (content, format)
        }
    };

    let spec = parse_build_spec(&content, format == Format::Json)?;
    info!(
        base = %spec.base_image,
        steps = spec.steps.len(),
        output = %spec.output.name,
        "Build spec loaded"
    );
    Ok(spec)
}

/// 文字列からビルド定義をパースして検証
pub fn parse_build_spec(content: &str, json: bool) -> Result<BuildSpec> {
    let spec: BuildSpec = if json {
        serde_json::from_str(content)?
    } else {
        serde_yaml::from_str(content)?
    };
    spec.validate()?;
    Ok(spec)
}

fn read_spec_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(SpecError::NotFound(path.to_path_buf()));
    }
    debug!("Reading build spec: {}", path.display());
    std::fs::read_to_string(path).map_err(|e| SpecError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn format_for_path(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
        _ => Format::Yaml,
    }
}

fn sniff_format(content: &str) -> Format {
    if content.trim_start().starts_with('{') {
        Format::Json
    } else {
        Format::Yaml
    }
}
