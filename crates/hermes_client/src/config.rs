//! Client config load/save for `~/.hermes/config.yaml`, plus environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";

/// Backend section (api_url, ws_url, health_check, timeouts).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BackendSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_timeout_secs: Option<u64>,
}

/// Reconnect section (max_attempts, backoff_secs).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReconnectSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_secs: Option<u64>,
}

/// Full config file.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Fully resolved connection settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub ws_url: String,
    pub health_check: bool,
    pub connect_timeout: Duration,
    pub health_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            ws_url: DEFAULT_WS_URL.into(),
            health_check: true,
            connect_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(2),
            max_reconnect_attempts: 3,
            reconnect_backoff: Duration::from_secs(3),
        }
    }
}

impl Settings {
    /// Full URL of the streaming chat endpoint.
    pub fn chat_socket_url(&self) -> String {
        format!("{}/api/ws/chat", self.ws_url.trim_end_matches('/'))
    }
}

impl Config {
    /// Resolve settings: file values over defaults, then `HERMES_API_URL` /
    /// `HERMES_WS_URL` over both.
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        let b = &self.backend;
        let r = &self.reconnect;
        let api_url = std::env::var("HERMES_API_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| b.api_url.clone())
            .unwrap_or(defaults.api_url);
        let ws_url = std::env::var("HERMES_WS_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| b.ws_url.clone())
            .unwrap_or(defaults.ws_url);
        Settings {
            api_url,
            ws_url,
            health_check: b.health_check.unwrap_or(defaults.health_check),
            connect_timeout: b
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            health_timeout: b
                .health_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_timeout),
            max_reconnect_attempts: r
                .max_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_backoff: r
                .backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_backoff),
        }
    }
}

/// Directory holding client state: `~/.hermes` (platform-specific home).
pub fn hermes_dir() -> Option<PathBuf> {
    let home = home_dir()?;
    Some(home.join(".hermes"))
}

/// Returns the default config file path: `~/.hermes/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    hermes_dir().map(|d| d.join("config.yaml"))
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<PathBuf> {
    None
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Load config if the file exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        load(path)
    } else {
        tracing::debug!(path = %path.display(), "config file missing, using defaults");
        Ok(Config::default())
    }
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Config load/save error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
