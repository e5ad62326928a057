//! 出力イメージ設定の蓄積
//!
//! set_config で受け取った変更を保持し、exec 時の環境と
//! commit 時の変更命令（Dockerfile 形式）に変換する。

use crate::error::{ContainerError, Result};
use boxwright_core::OutputImage;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// 公開イメージの説明に使うラベル
pub const DESCRIPTION_LABEL: &str = "org.opencontainers.image.description";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    /// ベースイメージの ENTRYPOINT / CMD（キープアライブ用の上書きを commit 時に戻す）
    base_entrypoint: Option<Vec<String>>,
    base_cmd: Option<Vec<String>>,
    env: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    user: Option<String>,
    workdir: Option<String>,
    cmd: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    exposed: BTreeSet<String>,
    /// 作業コンテナのリソース制限（イメージには残らない）
    memory: Option<i64>,
    nano_cpus: Option<i64>,
}

impl ImageConfig {
    /// イメージ inspect の `Config` (JSON) から作成
    pub fn from_image_config(config: &Value) -> Self {
        Self {
            base_entrypoint: string_list(config.get("Entrypoint")),
            base_cmd: string_list(config.get("Cmd")),
            ..Default::default()
        }
    }

    /// 設定キーを適用
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(name) = key.strip_prefix("env.") {
            if name.is_empty() || name.contains('=') {
                return Err(invalid(key, "環境変数名が不正です"));
            }
            self.env.insert(name.to_string(), value.to_string());
            return Ok(());
        }
        if let Some(name) = key.strip_prefix("label.") {
            if name.is_empty() {
                return Err(invalid(key, "ラベル名が空です"));
            }
            self.labels.insert(name.to_string(), value.to_string());
            return Ok(());
        }
        if key.starts_with("limits.") {
            return self.apply_limit(key, value);
        }

        match key {
            "user" => self.user = Some(non_empty(key, value)?),
            "workdir" => {
                let dir = non_empty(key, value)?;
                if !dir.starts_with('/') {
                    return Err(invalid(key, "絶対パスで指定してください"));
                }
                self.workdir = Some(dir);
            }
            "cmd" => self.cmd = Some(parse_command(key, value)?),
            "entrypoint" => self.entrypoint = Some(parse_command(key, value)?),
            "expose" => {
                self.exposed.insert(parse_port(key, value)?);
            }
            _ => return Err(ContainerError::UnsupportedConfigKey(key.to_string())),
        }
        Ok(())
    }

    fn apply_limit(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "limits.memory" => self.memory = Some(parse_memory(key, value)?),
            "limits.cpu" => self.nano_cpus = Some(parse_cpus(key, value)?),
            _ => return Err(ContainerError::UnsupportedConfigKey(key.to_string())),
        }
        Ok(())
    }

    /// メモリ上限（バイト）
    pub fn memory_limit(&self) -> Option<i64> {
        self.memory
    }

    /// CPU 上限（10^-9 CPU 単位）
    pub fn nano_cpus(&self) -> Option<i64> {
        self.nano_cpus
    }

    /// exec に渡す環境変数（`KEY=value`）
    pub fn exec_env(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn workdir(&self) -> Option<&str> {
        self.workdir.as_deref()
    }

    /// commit の changes パラメータ（改行区切りの Dockerfile 命令）
    pub fn commit_changes(&self, output: &OutputImage) -> String {
        let mut changes = Vec::new();

        let entrypoint = self.entrypoint.as_ref().or(self.base_entrypoint.as_ref());
        changes.push(format!("ENTRYPOINT {}", json_array(entrypoint)));
        let cmd = self.cmd.as_ref().or(self.base_cmd.as_ref());
        changes.push(format!("CMD {}", json_array(cmd)));

        for (key, value) in &self.env {
            changes.push(format!("ENV {}={}", key, quote(value)));
        }

        let mut labels = self.labels.clone();
        for (key, value) in &output.properties {
            labels.insert(key.clone(), value.clone());
        }
        if let Some(description) = &output.description {
            labels.insert(DESCRIPTION_LABEL.to_string(), description.clone());
        }
        for (key, value) in &labels {
            changes.push(format!("LABEL {}={}", quote(key), quote(value)));
        }

        if let Some(user) = &self.user {
            changes.push(format!("USER {}", user));
        }
        if let Some(workdir) = &self.workdir {
            changes.push(format!("WORKDIR {}", workdir));
        }
        for port in &self.exposed {
            changes.push(format!("EXPOSE {}", port));
        }

        changes.join("\n")
    }
}

fn invalid(key: &str, message: &str) -> ContainerError {
    ContainerError::InvalidConfigValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn non_empty(key: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid(key, "値が空です"));
    }
    Ok(value.to_string())
}

/// JSON 配列ならそのまま、それ以外は shell 形式として扱う
fn parse_command(key: &str, value: &str) -> Result<Vec<String>> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| invalid(key, &format!("JSON 配列として解釈できません: {}", e)));
    }
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        trimmed.to_string(),
    ])
}

/// `80` / `80/tcp` / `53/udp` を正規化
fn parse_port(key: &str, value: &str) -> Result<String> {
    let (port, proto) = value.trim().split_once('/').unwrap_or((value.trim(), "tcp"));
    if !matches!(proto, "tcp" | "udp" | "sctp") {
        return Err(invalid(key, &format!("未対応のプロトコルです: {}", proto)));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| invalid(key, &format!("ポート番号が不正です: {}", port)))?;
    if port == 0 {
        return Err(invalid(key, "ポート番号 0 は指定できません"));
    }
    Ok(format!("{}/{}", port, proto))
}

/// `536870912` / `512MB` / `512MiB` / `2g` をバイト数に変換（単位は 1024 倍）
fn parse_memory(key: &str, value: &str) -> Result<i64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: i64 = number
        .parse()
        .map_err(|_| invalid(key, &format!("メモリ量が不正です: {}", value)))?;

    let shift = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        "t" | "tb" | "tib" => 40,
        other => return Err(invalid(key, &format!("未対応の単位です: {}", other))),
    };
    let bytes = number
        .checked_mul(1i64 << shift)
        .ok_or_else(|| invalid(key, "メモリ量が大きすぎます"))?;
    if bytes <= 0 {
        return Err(invalid(key, "メモリ量は正の値で指定してください"));
    }
    Ok(bytes)
}

/// `2` / `0.5` を NanoCPUs に変換
fn parse_cpus(key: &str, value: &str) -> Result<i64> {
    let cpus: f64 = value
        .trim()
        .parse()
        .map_err(|_| invalid(key, &format!("CPU 数が不正です: {}", value)))?;
    if !cpus.is_finite() || cpus <= 0.0 {
        return Err(invalid(key, "CPU 数は正の値で指定してください"));
    }
    let nano = (cpus * 1e9).round();
    if nano < 1.0 || nano > i64::MAX as f64 {
        return Err(invalid(key, &format!("CPU 数が範囲外です: {}", value)));
    }
    Ok(nano as i64)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    })
}

fn json_array(items: Option<&Vec<String>>) -> String {
    let empty = Vec::new();
    serde_json::to_string(items.unwrap_or(&empty)).unwrap_or_else(|_| "[]".to_string())
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}
