pub mod error;

pub use error::*;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 設定ディレクトリを上書きする環境変数
pub const CONFIG_DIR_ENV: &str = "BOXWRIGHT_CONF";

/// 組み込みのローカルデーモン名
pub const LOCAL_REMOTE: &str = "local";

const CONFIG_FILE_NAME: &str = "config.yml";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// boxwright の設定ディレクトリを取得
///
/// 1. 環境変数 BOXWRIGHT_CONF
/// 2. ~/.config/boxwright
pub fn get_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("boxwright"))
}

/// リモート設定ファイル (config.yml) のパス
pub fn config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// リモート設定
///
/// ```yaml
/// default_remote: build-host
/// remotes:
///   build-host:
///     addr: tcp://10.0.0.5:2376
///     tls:
///       ca: ~/.docker/ca.pem
///       cert: ~/.docker/cert.pem
///       key: ~/.docker/key.pem
///     timeout_secs: 300
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemotesConfig {
    #[serde(default)]
    pub default_remote: Option<String>,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteEntry>,
}

/// リモート1件分の定義
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEntry {
    pub addr: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// 平文 TCP 接続を信頼済みとして扱う（明示的なオプトイン）
    #[serde(default)]
    pub trust_insecure: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// クライアント証明書によるTLS設定
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsConfig {
    /// `~/` で始まるパスをホームディレクトリに展開
    pub fn expand_home(self) -> Self {
        Self {
            ca: expand_home(self.ca),
            cert: expand_home(self.cert),
            key: expand_home(self.key),
        }
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path,
    }
}

/// 接続先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// DOCKER_HOST 等を含むローカルデフォルト
    LocalDefaults,
    Unix(PathBuf),
    /// 平文 TCP（`host:port`）
    Tcp(String),
    /// 相互TLS（`host:port`）
    Tls { addr: String, tls: TlsConfig },
}

/// 名前解決済みのリモート
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRemote {
    pub name: String,
    pub endpoint: Endpoint,
    pub trust_insecure: bool,
    pub timeout_secs: u64,
}

impl RemotesConfig {
    /// 設定ファイルを読み込む
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// 設定ファイルを読み込む。読めない場合はデフォルト設定を使う
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                debug!("Using default remote config ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// 標準の場所から設定を読み込む
    pub fn load_default() -> Self {
        match config_file_path() {
            Ok(path) => Self::load_or_default(&path),
            Err(e) => {
                debug!("Using default remote config: {}", e);
                Self::default()
            }
        }
    }

    /// リモート識別子を接続先に解決
    ///
    /// 1. 空文字列: default_remote（未設定なら local）
    /// 2. remotes に定義された名前
    /// 3. `local`: ローカルデーモン
    /// 4. `unix://` / `tcp://` / `http://` / `https://` の直接指定
    pub fn resolve(&self, identifier: &str) -> Result<ResolvedRemote> {
        let name = if identifier.is_empty() {
            self.default_remote.as_deref().unwrap_or(LOCAL_REMOTE)
        } else {
            identifier
        };

        if let Some(entry) = self.remotes.get(name) {
            let tls = entry.tls.clone().map(TlsConfig::expand_home);
            let endpoint = parse_address(name, &entry.addr, tls)?;
            return Ok(ResolvedRemote {
                name: name.to_string(),
                endpoint,
                trust_insecure: entry.trust_insecure,
                timeout_secs: entry.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            });
        }

        if name == LOCAL_REMOTE {
            return Ok(ResolvedRemote {
                name: name.to_string(),
                endpoint: Endpoint::LocalDefaults,
                trust_insecure: false,
                timeout_secs: DEFAULT_TIMEOUT_SECS,
            });
        }

        if name.contains("://") {
            return Ok(ResolvedRemote {
                name: name.to_string(),
                endpoint: parse_address(name, name, None)?,
                trust_insecure: false,
                timeout_secs: DEFAULT_TIMEOUT_SECS,
            });
        }

        Err(ConfigError::UnknownRemote(name.to_string()))
    }
}

fn parse_address(remote: &str, addr: &str, tls: Option<TlsConfig>) -> Result<Endpoint> {
    let invalid = |message: String| ConfigError::InvalidRemote {
        remote: remote.to_string(),
        message,
    };

    let (scheme, rest) = addr
        .split_once("://")
        .ok_or_else(|| invalid(format!("アドレスにスキームがありません: {}", addr)))?;

    if rest.is_empty() {
        return Err(invalid(format!("アドレスが空です: {}", addr)));
    }

    match (scheme, tls) {
        ("unix", None) => Ok(Endpoint::Unix(PathBuf::from(rest))),
        ("unix", Some(_)) => Err(invalid("unix ソケットに tls は指定できません".to_string())),
        ("tcp" | "http", None) => Ok(Endpoint::Tcp(rest.to_string())),
        ("tcp" | "https", Some(tls)) => Ok(Endpoint::Tls {
            addr: rest.to_string(),
            tls,
        }),
        ("https", None) => Err(invalid(
            "https 接続には tls (ca / cert / key) の設定が必要です".to_string(),
        )),
        ("http", Some(_)) => Err(invalid("http 接続に tls は指定できません".to_string())),
        (other, _) => Err(invalid(format!("未対応のスキームです: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    const CONFIG: &str = r#"
default_remote: builder
remotes:
  builder:
    addr: tcp://10.0.0.5:2376
    tls:
      ca: /certs/ca.pem
      cert: /certs/cert.pem
      key: /certs/key.pem
    timeout_secs: 300
  lab:
    addr: tcp://192.168.1.20:2375
    trust_insecure: true
  sock:
    addr: unix:///run/user/1000/docker.sock
"#;

    fn config() -> RemotesConfig {
        serde_yaml::from_str(CONFIG).unwrap()
    }

    #[test]
    fn test_resolve_local_builtin() {
        let resolved = RemotesConfig::default().resolve("local").unwrap();
        assert_eq!(resolved.endpoint, Endpoint::LocalDefaults);
        assert_eq!(resolved.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_resolve_empty_uses_default_remote() {
        let resolved = config().resolve("").unwrap();
        assert_eq!(resolved.name, "builder");
        assert_eq!(resolved.timeout_secs, 300);
        match resolved.endpoint {
            Endpoint::Tls { addr, tls } => {
                assert_eq!(addr, "10.0.0.5:2376");
                assert_eq!(tls.ca, PathBuf::from("/certs/ca.pem"));
            }
            other => panic!("Expected Tls endpoint, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_empty_without_default_is_local() {
        let resolved = RemotesConfig::default().resolve("").unwrap();
        assert_eq!(resolved.name, "local");
    }

    #[test]
    fn test_resolve_insecure_tcp() {
        let resolved = config().resolve("lab").unwrap();
        assert_eq!(resolved.endpoint, Endpoint::Tcp("192.168.1.20:2375".to_string()));
        assert!(resolved.trust_insecure);
    }

    #[test]
    fn test_resolve_unix_socket() {
        let resolved = config().resolve("sock").unwrap();
        assert_eq!(
            resolved.endpoint,
            Endpoint::Unix(PathBuf::from("/run/user/1000/docker.sock"))
        );
    }

    #[test]
    fn test_resolve_direct_address() {
        let resolved = RemotesConfig::default()
            .resolve("tcp://127.0.0.1:2375")
            .unwrap();
        assert_eq!(resolved.endpoint, Endpoint::Tcp("127.0.0.1:2375".to_string()));
        assert!(!resolved.trust_insecure);
    }

    #[test]
    fn test_resolve_unknown_remote() {
        let result = config().resolve("nowhere");
        assert!(matches!(result, Err(ConfigError::UnknownRemote(name)) if name == "nowhere"));
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_tls_paths_expand_home() {
        let config: RemotesConfig = serde_yaml::from_str(
            r#"
remotes:
  builder:
    addr: tcp://10.0.0.5:2376
    tls:
      ca: ~/.docker/ca.pem
      cert: ~/.docker/cert.pem
      key: /etc/docker/key.pem
"#,
        )
        .unwrap();

        temp_env::with_var("HOME", Some("/home/tester"), || {
            match config.resolve("builder").unwrap().endpoint {
                Endpoint::Tls { tls, .. } => {
                    assert_eq!(tls.ca, PathBuf::from("/home/tester/.docker/ca.pem"));
                    assert_eq!(tls.cert, PathBuf::from("/home/tester/.docker/cert.pem"));
                    assert_eq!(tls.key, PathBuf::from("/etc/docker/key.pem"));
                }
                other => panic!("Expected Tls endpoint, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_https_without_tls_is_invalid() {
        let result = RemotesConfig::default().resolve("https://10.0.0.5:2376");
        assert!(matches!(result, Err(ConfigError::InvalidRemote { .. })));
    }

    #[test]
    #[serial]
    fn test_config_dir_from_env() {
        let temp_dir = tempfile::tempdir().unwrap();
        temp_env::with_var(CONFIG_DIR_ENV, Some(temp_dir.path()), || {
            let dir = get_config_dir().unwrap();
            assert_eq!(dir, temp_dir.path());
            assert_eq!(config_file_path().unwrap(), temp_dir.path().join("config.yml"));
        });
    }

    #[test]
    #[serial]
    fn test_load_default_reads_config_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("config.yml"), CONFIG).unwrap();

        temp_env::with_var(CONFIG_DIR_ENV, Some(temp_dir.path()), || {
            let config = RemotesConfig::load_default();
            assert_eq!(config.default_remote.as_deref(), Some("builder"));
            assert_eq!(config.remotes.len(), 3);
        });
    }

    #[test]
    #[serial]
    fn test_load_default_falls_back_when_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        temp_env::with_var(CONFIG_DIR_ENV, Some(temp_dir.path()), || {
            let config = RemotesConfig::load_default();
            assert!(config.remotes.is_empty());
            assert!(config.default_remote.is_none());
        });
    }

    #[test]
    fn test_load_reports_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yml");
        fs::write(&path, "remotes: [not-a-map").unwrap();

        let result = RemotesConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
