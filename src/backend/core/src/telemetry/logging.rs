//! Structured logging and redaction of sensitive property values.
//!
//! Checkpoints carry arbitrary component properties, some of which hold
//! credentials (API keys for a map widget, session tokens). Anything the
//! injector or the CLI logs about a property value goes through
//! [`SensitiveFieldRedactor`] first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Include file and line
    #[serde(default)]
    pub include_location: bool,

    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Log span close events (carries span timings)
    #[serde(default)]
    pub span_close: bool,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: false,
            include_target: default_include_target(),
            span_close: false,
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    /// Single line per event
    #[default]
    Compact,
}

/// Configuration for sensitive value redaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// Property names (substring, case-insensitive) and value regex that mark
/// a value as sensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionPattern {
    pub name: String,

    #[serde(default)]
    pub field_names: Vec<String>,

    #[serde(default)]
    pub value_pattern: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    patterns: Vec<CompiledPattern>,
    replacement: String,
    enabled: bool,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    field_names: Vec<String>,
    value_regex: Option<regex::Regex>,
}

impl SensitiveFieldRedactor {
    pub fn new(config: &RedactionConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .map(|p| CompiledPattern {
                field_names: p.field_names.iter().map(|s| s.to_lowercase()).collect(),
                value_regex: p
                    .value_pattern
                    .as_ref()
                    .and_then(|pat| match regex::Regex::new(pat) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            tracing::warn!(pattern = %p.name, error = %e, "Ignoring invalid redaction pattern");
                            None
                        }
                    }),
            })
            .collect();

        Self {
            patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let lower = field_name.to_lowercase();
        self.patterns
            .iter()
            .any(|p| p.field_names.iter().any(|f| lower.contains(f)))
    }

    /// Mask every value-pattern match inside `value`.
    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }

        let mut result = value.to_string();
        for pattern in &self.patterns {
            if let Some(regex) = &pattern.value_regex {
                result = regex.replace_all(&result, self.replacement.as_str()).to_string();
            }
        }
        result
    }

    /// Redact a named string, by name first and then by value.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }
        self.redact_value(value)
    }

    /// Redact a JSON property value. Objects are walked so nested keys are
    /// checked by name too.
    pub fn redact_json(&self, field_name: &str, value: &serde_json::Value) -> serde_json::Value {
        use serde_json::Value;

        if !self.enabled {
            return value.clone();
        }
        if self.should_redact_field(field_name) {
            return Value::String(self.replacement.clone());
        }

        match value {
            Value::String(s) => Value::String(self.redact_value(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_json(field_name, v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_json(k, v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// The redactor installed by [`init_logging`], or one built from the
    /// default patterns.
    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_target() -> bool {
    true
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "api_keys".to_string(),
            field_names: vec!["api_key".to_string(), "apikey".to_string(), "api-key".to_string()],
            value_pattern: Some(r"(?:sk|pk)[-_][a-zA-Z0-9]{20,}".to_string()),
        },
        RedactionPattern {
            name: "passwords".to_string(),
            field_names: vec![
                "password".to_string(),
                "passwd".to_string(),
                "secret".to_string(),
                "credential".to_string(),
            ],
            value_pattern: None,
        },
        RedactionPattern {
            name: "tokens".to_string(),
            field_names: vec![
                "token".to_string(),
                "session".to_string(),
                "authorization".to_string(),
            ],
            value_pattern: Some(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+".to_string()),
        },
    ]
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails when a filter directive does not parse or a subscriber is already
/// installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let _ = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }

    let span_events = if config.span_close { FmtSpan::CLOSE } else { FmtSpan::NONE };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_by_field_name() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());
        assert_eq!(redactor.redact("apiKey", "abc"), "[REDACTED]");
        assert_eq!(redactor.redact("zoom", "12"), "12");
    }

    #[test]
    fn test_redacts_jwt_in_value() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());
        let out = redactor.redact_value("auth eyJhbGciOi.eyJzdWIiOi.c2lnbmF0dXJl done");
        assert_eq!(out, "auth [REDACTED] done");
    }

    #[test]
    fn test_redact_json_walks_objects() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());
        let value = json!({ "center": [1, 2], "accessToken": "xyz" });

        let out = redactor.redact_json("settings", &value);
        assert_eq!(out["center"], json!([1, 2]));
        assert_eq!(out["accessToken"], json!("[REDACTED]"));
    }

    #[test]
    fn test_disabled_redactor_is_identity() {
        let config = RedactionConfig {
            enabled: false,
            ..Default::default()
        };
        let redactor = SensitiveFieldRedactor::new(&config);
        assert_eq!(redactor.redact("password", "hunter2"), "hunter2");
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.redaction.enabled);
    }
}
