//! Configuration management for the ATS session tools
//!
//! Config files are stored in platform-appropriate locations:
//! - Linux: ~/.config/ats-session/
//! - macOS: ~/Library/Application Support/ats-session/
//! - Windows: %APPDATA%\ats-session\

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Overrides `client.api_base_url`
pub const API_BASE_URL_ENV: &str = "ATS_API_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    NoDirFound,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Where credentials live between runs
    #[serde(default)]
    pub storage: StorageConfig,

    /// Local auth backend (for ats-devserver)
    #[serde(default)]
    pub devserver: DevServerConfig,
}

/// Client-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Where the user is sent when the session ends
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Refresh before a request when fewer seconds than this remain
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: i64,

    /// Refresh in the background after a fast-path restore below this
    #[serde(default = "default_background_refresh_threshold")]
    pub background_refresh_threshold_secs: i64,

    /// Give up on a hung refresh after this many seconds (0 disables)
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Credential storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory override, defaults to the config directory
    pub dir: Option<PathBuf>,

    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,
}

/// Dev server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// JWT secret (base64 encoded)
    /// If not set, a random secret is generated on every start
    pub jwt_secret: Option<String>,

    /// Access token TTL in seconds
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl: u64,

    /// Refresh token TTL in seconds
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl: u64,
}

// Default value functions
fn default_api_base_url() -> String {
    crate::DEFAULT_API_BASE_URL.to_string()
}
fn default_login_path() -> String {
    crate::DEFAULT_LOGIN_PATH.to_string()
}
fn default_refresh_threshold() -> i64 {
    crate::token::DEFAULT_REFRESH_THRESHOLD
}
fn default_background_refresh_threshold() -> i64 {
    crate::token::BACKGROUND_REFRESH_THRESHOLD
}
fn default_refresh_timeout() -> u64 {
    30
}
fn default_credentials_file() -> String {
    "credentials.json".to_string()
}
fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    crate::DEFAULT_DEVSERVER_PORT
}
fn default_access_ttl() -> u64 {
    900 // 15 minutes
}
fn default_refresh_ttl() -> u64 {
    604800 // 7 days
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            login_path: default_login_path(),
            refresh_threshold_secs: default_refresh_threshold(),
            background_refresh_threshold_secs: default_background_refresh_threshold(),
            refresh_timeout_secs: default_refresh_timeout(),
            request_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    pub fn refresh_timeout(&self) -> Option<Duration> {
        match self.refresh_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            credentials_file: default_credentials_file(),
        }
    }
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            jwt_secret: None,
            access_token_ttl: default_access_ttl(),
            refresh_token_ttl: default_refresh_ttl(),
        }
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("ats-session"))
            .ok_or(ConfigError::NoDirFound)
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from default location, then apply env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env(std::env::var(API_BASE_URL_ENV).ok());
        Ok(config)
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path of the durable credentials file
    pub fn credentials_path(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.storage.dir {
            Some(dir) => dir.clone(),
            None => Self::config_dir()?,
        };
        Ok(dir.join(&self.storage.credentials_file))
    }

    fn apply_env(&mut self, api_base_url: Option<String>) {
        if let Some(url) = api_base_url.filter(|u| !u.trim().is_empty()) {
            self.client.api_base_url = url;
        }
    }
}
