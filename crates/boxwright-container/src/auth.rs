//! ベースイメージ取得用のレジストリ認証
//!
//! Docker の config.json（auths / credsStore / credHelpers）から認証情報を解決する。

use crate::error::{ContainerError, Result};
use base64::Engine;
use bollard::auth::DockerCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

const DOCKER_HUB: &str = "docker.io";
/// config.json 上の Docker Hub のキー
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperResponse {
    username: String,
    secret: String,
}

/// レジストリ認証情報の解決
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// DOCKER_CONFIG または ~/.docker/config.json を使用
    pub fn new() -> Self {
        let config_dir = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            });
        Self::with_config_path(config_dir.join("config.json"))
    }

    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// イメージに対応する認証情報。見つからなければ None（匿名で pull）
    pub fn credentials_for(&self, image: &str) -> Result<Option<DockerCredentials>> {
        if !self.config_path.exists() {
            tracing::debug!("Docker config not found: {}", self.config_path.display());
            return Ok(None);
        }

        let registry = registry_of(image);
        let config = self.load_config()?;

        let auth_key = if registry == DOCKER_HUB {
            DOCKER_HUB_AUTH_KEY
        } else {
            registry
        };
        let inline = config
            .auths
            .get(auth_key)
            .or_else(|| config.auths.get(registry))
            .and_then(|entry| entry.auth.as_deref());
        if let Some(auth_b64) = inline {
            return decode_auth(auth_b64, registry).map(Some);
        }

        let helper = config
            .cred_helpers
            .get(registry)
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            return Ok(query_helper(helper, auth_key));
        }

        Ok(None)
    }

    fn load_config(&self) -> Result<DockerConfig> {
        let failed = |message: String| ContainerError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| failed(format!("config.json を読み込めません: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| failed(format!("config.json を解釈できません: {}", e)))
    }
}

/// イメージ名からレジストリを抽出
///
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `localhost:5000/app` -> `localhost:5000`
/// - `ubuntu:20.04` / `myuser/app` -> `docker.io`
pub fn registry_of(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => DOCKER_HUB,
    }
}

fn decode_auth(auth_b64: &str, registry: &str) -> Result<DockerCredentials> {
    let failed = |message: String| ContainerError::AuthFailed {
        registry: registry.to_string(),
        message,
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64.trim())
        .map_err(|e| failed(format!("auth をデコードできません: {}", e)))?;
    let decoded = String::from_utf8(decoded).map_err(|e| failed(e.to_string()))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| failed("auth が username:password 形式ではありません".to_string()))?;

    Ok(DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    })
}

/// credential helper に問い合わせる。失敗時は匿名で続行するため None
fn query_helper(helper: &str, server: &str) -> Option<DockerCredentials> {
    let helper_cmd = format!("docker-credential-{}", helper);
    tracing::debug!("Querying credential helper: {}", helper_cmd);

    let mut child = Command::new(&helper_cmd)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| tracing::debug!("Failed to run {}: {}", helper_cmd, e))
        .ok()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(server.as_bytes()).ok();
    }

    let output = child.wait_with_output().ok()?;
    if !output.status.success() {
        tracing::debug!(
            "Credential helper has no entry for {}: {}",
            server,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    let response: HelperResponse = serde_json::from_slice(&output.stdout).ok()?;
    Some(DockerCredentials {
        username: Some(response.username),
        password: Some(response.secret),
        serveraddress: Some(server.to_string()),
        ..Default::default()
    })
}
