//! Server settings: limits for the built-in transport and runtime sizing.
//!
//! Every field has a default, so a config file only needs the values it changes:
//!
//! ```toml
//! max_request_size = 1048576
//! worker_threads = 4
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while loading or validating a [`ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for [`Server`](crate::server::Server) and [`Router::start`](crate::Router::start).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Largest request (head plus body) buffered before answering `413` (default 8 MiB).
    pub max_request_size: usize,

    /// Initial read buffer capacity per connection (default 4 KiB).
    pub initial_buffer_size: usize,

    /// Most headers accepted in one request; more is answered with `431` (default 64).
    pub max_headers: usize,

    /// Runtime worker threads for [`Router::start`](crate::Router::start);
    /// Tokio's default (one per core) when unset.
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_size: 8 * 1024 * 1024,
            initial_buffer_size: 4096,
            max_headers: 64,
            worker_threads: None,
        }
    }
}

impl ServerConfig {
    /// Upper bound for [`max_headers`](Self::max_headers).
    pub const HEADER_LIMIT: usize = 256;

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// As [`from_toml_str`](Self::from_toml_str), plus [`ConfigError::Io`] if
    /// the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_size == 0 {
            return Err(ConfigError::Invalid(
                "max_request_size must be greater than zero".into(),
            ));
        }
        if self.initial_buffer_size == 0 || self.initial_buffer_size > self.max_request_size {
            return Err(ConfigError::Invalid(format!(
                "initial_buffer_size must be between 1 and max_request_size ({})",
                self.max_request_size
            )));
        }
        if self.max_headers == 0 || self.max_headers > Self::HEADER_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_headers must be between 1 and {}",
                Self::HEADER_LIMIT
            )));
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "worker_threads must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
