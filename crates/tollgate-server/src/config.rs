//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tollgate_core::{GateError, GateResult};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub license: LicenseSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_sessions: usize,
    /// Seconds; 0 = no idle timeout.
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_sessions: 0,
            idle_timeout: 0,
        }
    }
}

/// `[backend]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_addr")]
    pub addr: String,
    /// Seconds; 0 = leave it to the OS.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            addr: default_backend_addr(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// `[license]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicenseSection {
    /// RFC 3339 expiry instant. Takes precedence over `file`.
    pub expires_at: Option<String>,
    /// Path to a license file (see [`crate::license`]).
    pub file: Option<String>,
    /// Bytes written to a denied client before the connection is closed.
    pub reject_message: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:7688".to_string()
}
fn default_backend_addr() -> String {
    "localhost:7687".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}

/// Values given on the command line; each one overrides the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub backend: Option<String>,
    pub expires_at: Option<String>,
    pub license_file: Option<String>,
    pub max_sessions: Option<usize>,
    pub idle_timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
}

/// Where the expiry instant comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseSource {
    /// An RFC 3339 string from the config file or CLI.
    Inline(String),
    /// A license file on disk.
    File(PathBuf),
    /// Nothing configured: every connection is denied.
    None,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub listen: String,
    pub backend_addr: String,
    pub connect_timeout: Option<Duration>,
    pub max_sessions: Option<usize>,
    pub idle_timeout: Option<Duration>,
    pub license: LicenseSource,
    pub reject_message: Option<Vec<u8>>,
}

impl GateConfig {
    /// Load config from a TOML file (if it exists), then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: ConfigOverrides) -> GateResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| GateError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file_config, cli))
    }

    /// Merge CLI overrides over a parsed config file.
    pub fn resolve(file: ConfigFile, cli: ConfigOverrides) -> Self {
        let max_sessions = cli.max_sessions.unwrap_or(file.server.max_sessions);
        let idle_timeout = cli.idle_timeout.unwrap_or(file.server.idle_timeout);
        let connect_timeout = cli.connect_timeout.unwrap_or(file.backend.connect_timeout);

        // CLI beats file; an explicit expiry beats a license file at either level.
        let license = match (
            cli.expires_at,
            cli.license_file,
            file.license.expires_at,
            file.license.file,
        ) {
            (Some(at), _, _, _) => LicenseSource::Inline(at),
            (None, Some(path), _, _) => LicenseSource::File(expand_tilde_str(&path)),
            (None, None, Some(at), _) => LicenseSource::Inline(at),
            (None, None, None, Some(path)) => LicenseSource::File(expand_tilde_str(&path)),
            (None, None, None, None) => LicenseSource::None,
        };

        Self {
            listen: cli.listen.unwrap_or(file.server.listen),
            backend_addr: cli.backend.unwrap_or(file.backend.addr),
            connect_timeout: non_zero_secs(connect_timeout),
            max_sessions: (max_sessions > 0).then_some(max_sessions),
            idle_timeout: non_zero_secs(idle_timeout),
            license,
            reject_message: file
                .license
                .reject_message
                .filter(|m| !m.is_empty())
                .map(String::into_bytes),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
