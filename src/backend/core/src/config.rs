//! Configuration management.
//!
//! Values come from an optional TOML file, then `ROAM__`-prefixed
//! environment variables (`ROAM__MIGRATION__CHECKPOINT_TIMEOUT=10s`).
//! Every field has a default, so an empty source yields a usable config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "ROAM";
const ENV_SEPARATOR: &str = "__";

/// Main runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Forward locally published messages to subscribers on other devices
    #[serde(default = "default_remote_forwarding")]
    pub remote_forwarding: bool,

    /// Log a warning when a publish finds no channel
    #[serde(default = "default_warn_unrouted")]
    pub warn_unrouted: bool,

    /// BackLink requests awaiting a reply; the oldest is forgotten past this
    #[serde(default = "default_max_pending_callbacks")]
    pub max_pending_callbacks: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            remote_forwarding: default_remote_forwarding(),
            warn_unrouted: default_warn_unrouted(),
            max_pending_callbacks: default_max_pending_callbacks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Upper bound on waiting for property-change confirmations
    #[serde(default = "default_checkpoint_timeout", with = "humantime_serde")]
    pub checkpoint_timeout: Duration,

    /// Fail validation when two input events share a timestamp
    #[serde(default)]
    pub reject_duplicate_timestamps: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            checkpoint_timeout: default_checkpoint_timeout(),
            reject_duplicate_timestamps: false,
        }
    }
}

fn default_remote_forwarding() -> bool { true }
fn default_warn_unrouted() -> bool { true }
fn default_max_pending_callbacks() -> usize { 1024 }
fn default_checkpoint_timeout() -> Duration { Duration::from_secs(5) }

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from a file, with the environment layered on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.broker.remote_forwarding);
        assert_eq!(config.broker.max_pending_callbacks, 1024);
        assert_eq!(config.migration.checkpoint_timeout, Duration::from_secs(5));
        assert!(!config.migration.reject_duplicate_timestamps);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[broker]
remote_forwarding = false

[migration]
checkpoint_timeout = "250ms"
reject_duplicate_timestamps = true
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.broker.remote_forwarding);
        assert!(config.broker.warn_unrouted);
        assert_eq!(config.migration.checkpoint_timeout, Duration::from_millis(250));
        assert!(config.migration.reject_duplicate_timestamps);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigurationError);
    }
}
