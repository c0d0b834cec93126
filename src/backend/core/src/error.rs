//! Error handling for Roam Core.
//!
//! This module provides:
//! - A single error type with machine-readable codes and structured context
//! - Classification of failures into protocol, resolution, duplicate and
//!   migration classes
//! - Severity-driven logging with tracing integration
//! - Metrics integration for error tracking
//!
//! The broker and the injector use the same type but handle it differently:
//! the broker logs and degrades to a failure indicator, the injector aborts
//! the whole injection and surfaces the error to its caller.
//!
//! # Usage
//!
//! ```rust,ignore
//! use roam_core::error::{RoamError, Result, ErrorContext, ErrorCode};
//!
//! fn load(raw: &str) -> Result<serde_json::Value> {
//!     serde_json::from_str(raw).with_error_code(ErrorCode::MalformedMessage)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Roam operations.
pub type Result<T> = std::result::Result<T, RoamError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and travel inside runtime responses, so peers can
/// react to them programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Protocol / structural errors (1000-1099)
    UnknownChannelType,
    MalformedChannel,
    UnknownEventKind,
    MissingRequiredField,
    InvalidField,
    CallEventNotAllowed,
    DuplicateProperty,
    MalformedMessage,
    UnknownAction,

    // Resolution errors (1100-1199)
    ChannelNotFound,
    PublisherNotRegistered,
    UnresolvedWiring,
    ContainerNotFound,

    // Duplicate registration (1200-1299)
    DuplicateChannel,

    // Migration errors (1300-1399)
    CheckpointTimeout,
    InvalidStateTransition,
    PropertyWriteFailed,
    ReplayFailed,

    // Serialization errors (2200-2299)
    SerializationError,

    // Configuration errors (5000-5099)
    ConfigurationError,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::UnknownChannelType => 1000,
            Self::MalformedChannel => 1001,
            Self::UnknownEventKind => 1002,
            Self::MissingRequiredField => 1003,
            Self::InvalidField => 1004,
            Self::CallEventNotAllowed => 1005,
            Self::DuplicateProperty => 1006,
            Self::MalformedMessage => 1007,
            Self::UnknownAction => 1008,

            Self::ChannelNotFound => 1100,
            Self::PublisherNotRegistered => 1101,
            Self::UnresolvedWiring => 1102,
            Self::ContainerNotFound => 1103,

            Self::DuplicateChannel => 1200,

            Self::CheckpointTimeout => 1300,
            Self::InvalidStateTransition => 1301,
            Self::PropertyWriteFailed => 1302,
            Self::ReplayFailed => 1303,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Resolution failures may succeed later, once wiring completes.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotFound
                | Self::PublisherNotRegistered
                | Self::UnresolvedWiring
                | Self::ContainerNotFound
                | Self::CheckpointTimeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "protocol",
            1100..=1199 => "resolution",
            1200..=1299 => "duplicate",
            1300..=1399 => "migration",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Transient wiring gaps, expected during composition edits
    Low,
    /// Operational issues (timeouts, rejected writes)
    Medium,
    /// Protocol violations and aborted relocations
    High,
    /// Broken invariants inside the runtime
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ChannelNotFound
            | ErrorCode::PublisherNotRegistered
            | ErrorCode::UnresolvedWiring
            | ErrorCode::ContainerNotFound => Self::Low,

            ErrorCode::CheckpointTimeout
            | ErrorCode::PropertyWriteFailed
            | ErrorCode::ReplayFailed
            | ErrorCode::ConfigurationError => Self::Medium,

            ErrorCode::UnknownChannelType
            | ErrorCode::MalformedChannel
            | ErrorCode::UnknownEventKind
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidField
            | ErrorCode::CallEventNotAllowed
            | ErrorCode::DuplicateProperty
            | ErrorCode::MalformedMessage
            | ErrorCode::UnknownAction
            | ErrorCode::DuplicateChannel
            | ErrorCode::SerializationError => Self::High,

            ErrorCode::InvalidStateTransition | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (channel name, instance id, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Roam Core.
#[derive(Error, Debug)]
pub struct RoamError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Message safe to show in a migration failure report
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for RoamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl RoamError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both public and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the public message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error may clear up on retry.
    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium | ErrorSeverity::Low => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Recoverable error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "roam_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| RoamError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| RoamError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| RoamError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| RoamError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for RoamError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_data() || error.is_syntax() || error.is_eof() {
            ErrorCode::MalformedMessage
        } else {
            ErrorCode::SerializationError
        };
        Self::with_internal(code, "Failed to process JSON payload", error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RoamError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::CheckpointTimeout,
            "Timed out waiting for property confirmations",
            error.to_string(),
        )
    }
}

impl From<std::io::Error> for RoamError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::InternalError, "I/O error occurred", error.to_string())
    }
}

impl From<config::ConfigError> for RoamError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl RoamError {
    // ─────────────────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Channel payload carried a type number outside Link/BackLink/PropertyLink.
    pub fn unknown_channel_type(type_number: i64) -> Self {
        Self::new(
            ErrorCode::UnknownChannelType,
            format!("Unknown channel type: {}", type_number),
        )
        .with_details(
            ErrorDetails::new().with_suggestion("Check that both runtimes speak the same protocol version"),
        )
        .with_context("type", type_number)
    }

    /// Channel payload could not be turned into a well-formed channel.
    pub fn malformed_channel(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::MalformedChannel,
            format!("Malformed channel {}: {}", name, reason.into()),
        )
        .with_details(ErrorDetails::new().with_entity("channel", name))
    }

    /// Input event discriminant not recognized.
    pub fn unknown_event_kind(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::new(ErrorCode::UnknownEventKind, format!("Unknown input event kind: {}", kind))
            .with_context("event", kind)
    }

    /// A wire record lacks a field its variant requires.
    pub fn missing_field(variant: &'static str, field: &'static str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is missing required field '{}'", variant, field),
        )
        .with_context("variant", variant)
        .with_context("field", field)
    }

    /// A field is present but has the wrong shape.
    pub fn invalid_field(variant: &'static str, field: &'static str, expected: &'static str) -> Self {
        Self::new(
            ErrorCode::InvalidField,
            format!("{} field '{}' must be {}", variant, field, expected),
        )
        .with_context("variant", variant)
        .with_context("field", field)
    }

    /// A call event reached the downstream path.
    pub fn call_event_not_allowed(instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        Self::new(
            ErrorCode::CallEventNotAllowed,
            "Call events are not accepted after a migration commit",
        )
        .with_details(ErrorDetails::new().with_entity("instance", instance_id))
    }

    /// Checkpoint names the same property twice.
    pub fn duplicate_property(instance_id: impl Into<String>, property: impl Into<String>) -> Self {
        let property = property.into();
        Self::new(
            ErrorCode::DuplicateProperty,
            format!("Checkpoint lists property '{}' more than once", property),
        )
        .with_details(ErrorDetails::new().with_entity("instance", instance_id.into()))
        .with_context("property", property)
    }

    /// Runtime request carried an unrecognized action.
    pub fn unknown_action(action: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownAction, format!("Unknown runtime action: {}", action.into()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resolution Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a channel not found error.
    pub fn channel_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorCode::ChannelNotFound, format!("Channel not found: {}", name))
            .with_details(ErrorDetails::new().with_entity("channel", name))
    }

    /// Publisher has no channel registered for the event.
    pub fn publisher_not_registered(instance_id: impl Into<String>, event: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        let event = event.into();
        Self::new(
            ErrorCode::PublisherNotRegistered,
            format!("No channel registered for {} publishing '{}'", instance_id, event),
        )
        .with_details(ErrorDetails::new().with_entity("instance", instance_id))
        .with_context("event", event)
    }

    /// Channel registered but some of its instances cannot be resolved yet.
    pub fn unresolved_wiring(name: impl Into<String>, unresolved: &[String]) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::UnresolvedWiring,
            format!("Channel {} is waiting for {} instance(s)", name, unresolved.len()),
        )
        .with_details(ErrorDetails::new().with_entity("channel", name))
        .with_context("unresolved", unresolved)
    }

    /// Create a container not found error.
    pub fn container_not_found(instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        Self::new(
            ErrorCode::ContainerNotFound,
            format!("No component container for instance {}", instance_id),
        )
        .with_details(ErrorDetails::new().with_entity("instance", instance_id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Duplicate Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a duplicate channel error.
    pub fn duplicate_channel(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorCode::DuplicateChannel, format!("Channel already added: {}", name))
            .with_details(
                ErrorDetails::new()
                    .with_entity("channel", name)
                    .with_suggestion("Remove the existing channel before redefining it"),
            )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Migration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Property confirmations did not all arrive in time.
    pub fn checkpoint_timeout(instance_id: impl Into<String>, pending: &[String]) -> Self {
        Self::new(
            ErrorCode::CheckpointTimeout,
            format!("Checkpoint of {} did not complete", instance_id.into()),
        )
        .with_context("pending_properties", pending)
    }

    /// Create an invalid state transition error.
    pub fn invalid_state_transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid injection phase transition: {:?} -> {:?}", from, to),
        )
        .with_context("from_state", format!("{:?}", from))
        .with_context("to_state", format!("{:?}", to))
    }

    /// Container refused a property write.
    pub fn property_write_failed(instance_id: impl Into<String>, property: impl Into<String>, reason: impl Into<String>) -> Self {
        let property = property.into();
        Self::with_internal(
            ErrorCode::PropertyWriteFailed,
            format!("Failed to restore property '{}'", property),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("instance", instance_id.into()))
        .with_context("property", property)
    }

    /// Container proxy rejected a replayed event.
    pub fn replay_failed(instance_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::ReplayFailed, "Failed to replay input event", reason)
            .with_details(ErrorDetails::new().with_entity("instance", instance_id.into()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
