//! Configuration management for quickshare
//!
//! Loads optional settings from ~/.config/quickshare/config.toml. Priority:
//! command-line flags > environment variables > config file > defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{DEFAULT_DISCOVERY_PORT, DEFAULT_HTTP_PORT, DEFAULT_SOCKET_PATH};

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Application name for config directory
const APP_NAME: &str = "quickshare";

/// Environment variable overriding the HTTP port
pub const ENV_PORT: &str = "QUICKSHARE_PORT";

/// Environment variable overriding the control socket path
pub const ENV_SOCKET: &str = "QUICKSHARE_SOCKET";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError { path: PathBuf, source: io::Error },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings read from the config file. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// HTTP port
    #[serde(default)]
    pub port: Option<u16>,

    /// UDP port for discovery
    #[serde(default)]
    pub discovery_port: Option<u16>,

    /// Address the HTTP and discovery listeners bind to
    #[serde(default)]
    pub bind_address: Option<IpAddr>,

    /// Location of the control socket
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// File to write logs to in addition to stderr
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Config {
    /// Get the config file path
    ///
    /// Returns ~/.config/quickshare/config.toml on Linux
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load the default config file with environment overrides applied.
    ///
    /// A missing file or config directory yields the defaults.
    pub fn load() -> ConfigResult<Self> {
        let mut config = match Self::config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override values from the environment, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PORT) {
            let port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_PORT,
                value: value.clone(),
            })?;
            self.port = Some(port);
        }
        if let Some(value) = lookup(ENV_SOCKET) {
            if !value.is_empty() {
                self.socket_path = Some(PathBuf::from(value));
            }
        }
        Ok(())
    }

    pub fn http_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn discovery_port(&self) -> u16 {
        self.discovery_port.unwrap_or(DEFAULT_DISCOVERY_PORT)
    }

    pub fn bind_address(&self) -> IpAddr {
        self.bind_address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address(), self.http_port())
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address(), self.discovery_port())
    }
}
