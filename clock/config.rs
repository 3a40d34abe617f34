//! # Service Configuration
//!
//! The service reads an optional TOML file. Every key has a default, so an empty
//! file, or no file at all, yields a working service backed by the bundled table.
//! Command-line flags are applied on top of whatever the file says.

use crate::coefficients::CoefficientSource;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_ROUTE: &str = "/epi-clock-service";
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid bind address '{0}'")]
    InvalidBind(String),
    #[error("The estimate route must start with '/', got '{0}'")]
    InvalidRoute(String),
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub route: String,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            route: DEFAULT_ROUTE.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoefficientConfig {
    /// A coefficient TSV on disk. When absent the bundled table is used.
    pub path: Option<PathBuf>,
    /// Defer loading until the first request. Load failures then surface as
    /// per-request internal errors instead of stopping startup.
    pub lazy: bool,
}

impl CoefficientConfig {
    pub fn source(&self) -> CoefficientSource {
        CoefficientSource::from_path(self.path.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// An `env_logger` filter; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub coefficients: CoefficientConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Loads a configuration file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn with_overrides(mut self, bind: Option<String>, coefficients: Option<PathBuf>) -> Self {
        if let Some(bind) = bind {
            self.server.bind = bind;
        }
        if let Some(path) = coefficients {
            self.coefficients.path = Some(path);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;
        if !self.server.route.starts_with('/') {
            return Err(ConfigError::InvalidRoute(self.server.route.clone()));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::ZeroLimit("server.max_body_bytes"));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroLimit("server.request_timeout_secs"));
        }
        Ok(())
    }
}
