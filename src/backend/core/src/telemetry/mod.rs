//! Telemetry: structured logging and metrics.
//!
//! - **Logging**: `tracing` subscriber with JSON/pretty/compact output and
//!   redaction of sensitive property values
//! - **Metrics**: broker and injector counters recorded through the
//!   `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use roam_core::telemetry::{init_telemetry, LoggingConfig};
//!
//! init_telemetry(&LoggingConfig::default()).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern, SensitiveFieldRedactor};
pub use metrics::{describe_metrics, BrokerMetrics, MigrationMetrics, OperationTimer, RuntimeMetrics};

/// Install logging and register metric descriptions. Call once at startup.
///
/// # Errors
///
/// Returns an error if the subscriber cannot be installed.
pub fn init_telemetry(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logging(config)?;
    describe_metrics();
    ::tracing::debug!(level = %config.level, format = ?config.format, "Telemetry initialized");
    Ok(())
}
