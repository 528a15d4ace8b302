//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on malformed values.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::ServiceConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub queue_capacity: usize,
    pub consumers: usize,
    pub session_end_attempts: u32,
    pub session_end_backoff_ms: u64,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            consumers: 1,
            session_end_attempts: 1,
            session_end_backoff_ms: 50,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, using defaults for
    /// anything unset.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            queue_capacity: parsed_var("SCOPEWORK_QUEUE_CAPACITY", defaults.queue_capacity)?,
            consumers: parsed_var("SCOPEWORK_CONSUMERS", defaults.consumers)?,
            session_end_attempts: parsed_var(
                "SCOPEWORK_SESSION_END_ATTEMPTS",
                defaults.session_end_attempts,
            )?,
            session_end_backoff_ms: parsed_var(
                "SCOPEWORK_SESSION_END_BACKOFF_MS",
                defaults.session_end_backoff_ms,
            )?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file. A file that cannot be read is an
    /// `Error::Io`; bad contents are an `Error::Config`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Engine settings derived from this configuration.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            consumers: self.consumers,
            session_end_attempts: self.session_end_attempts,
            session_end_backoff: Duration::from_millis(self.session_end_backoff_ms),
            ..ServiceConfig::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".to_string()));
        }
        if self.consumers == 0 {
            return Err(Error::Config("consumers must be positive".to_string()));
        }
        if self.session_end_attempts == 0 {
            return Err(Error::Config(
                "session_end_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        Err(_) => Ok(default),
    }
}
