//! Configuration system for httptun.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HTTPTUN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/httptun/config.toml
//!   3. ~/.config/httptun/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP endpoint binds to.
    pub bind_addr: String,
    /// Path the tunnel endpoint is mounted on.
    pub path: String,
    /// Largest accepted PUT body.
    pub max_body_bytes: usize,
    /// Sessions idle longer than this are closed. 0 = never.
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Full URL of the remote tunnel endpoint.
    pub endpoint: String,
    /// Per-request timeout. 0 = none.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP address each accepted session is bridged to. Empty = echo.
    pub upstream: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:10000".to_string(),
            path: "/".to_string(),
            max_body_bytes: crate::wire::MAX_READ_BYTES,
            idle_timeout_secs: 300,
            reap_interval_secs: 30,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:10000/".to_string(),
            request_timeout_secs: 0,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("httptun")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TunnelConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TunnelConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HTTPTUN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TunnelConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HTTPTUN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HTTPTUN_SERVER__BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("HTTPTUN_SERVER__PATH") {
            self.server.path = v;
        }
        if let Ok(v) = std::env::var("HTTPTUN_SERVER__IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.server.idle_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("HTTPTUN_CLIENT__ENDPOINT") {
            self.client.endpoint = v;
        }
        if let Ok(v) = std::env::var("HTTPTUN_CLIENT__REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.client.request_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("HTTPTUN_DAEMON__UPSTREAM") {
            self.daemon.upstream = v;
        }
    }
}
