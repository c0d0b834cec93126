//! Migration state objects and replay plans.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{sort_by_timestamp, InputEvent};
use crate::config::MigrationConfig;
use crate::container::InstanceId;
use crate::error::{ErrorCode, ErrorContext, Result, RoamError};

/// One checkpointed property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub name: String,
    /// Declared datatype, as named by the component
    #[serde(rename = "type", default)]
    pub datatype: String,
    pub value: Value,
}

impl PropertyRecord {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            datatype: json_type_name(&value).to_string(),
            value,
        }
    }
}

/// Name of a value's JSON type.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Everything needed to rebuild one component instance elsewhere.
///
/// Input events stay in their raw wire form until a replay plan is built,
/// so a state object can be forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStateObject {
    #[serde(rename = "instanceid")]
    pub instance_id: InstanceId,
    #[serde(default)]
    pub checkpoint: Vec<PropertyRecord>,
    #[serde(rename = "inputEvents", default)]
    pub input_events: Vec<Value>,
}

impl MigrationStateObject {
    pub fn new(instance_id: impl Into<InstanceId>) -> Self {
        Self {
            instance_id: instance_id.into(),
            checkpoint: Vec::new(),
            input_events: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.checkpoint.push(PropertyRecord::new(name, value));
        self
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.input_events.push(event);
        self
    }

    /// Parse one state object or an array of them.
    pub fn parse_many(json: &str) -> Result<Vec<Self>> {
        let value: Value = serde_json::from_str(json).with_error_code(ErrorCode::MalformedMessage)?;
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|v| serde_json::from_value(v).with_error_code(ErrorCode::MalformedMessage))
                .collect(),
            single => Ok(vec![serde_json::from_value(single).with_error_code(ErrorCode::MalformedMessage)?]),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.checkpoint.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Check that property names are unique.
    pub fn validate_checkpoint(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for record in &self.checkpoint {
            if !seen.insert(record.name.as_str()) {
                return Err(RoamError::duplicate_property(self.instance_id.as_str(), &record.name));
            }
        }
        Ok(())
    }

    /// Decode every input event and sort them for replay.
    pub fn replay_plan(&self, config: &MigrationConfig) -> Result<ReplayPlan> {
        self.validate_checkpoint()?;

        let mut events = self
            .input_events
            .iter()
            .map(InputEvent::from_wire)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.with_context("instance", self.instance_id.as_str()))?;
        sort_by_timestamp(&mut events);

        if config.reject_duplicate_timestamps {
            if let Some(pair) = events.windows(2).find(|w| w[0].timestamp() == w[1].timestamp()) {
                return Err(RoamError::invalid_field("InputEvent", "timestamp", "unique within one component")
                    .with_context("instance", self.instance_id.as_str())
                    .with_context("timestamp", pair[0].timestamp()));
            }
        }

        Ok(ReplayPlan {
            instance_id: self.instance_id.clone(),
            checkpoint: self.checkpoint.clone(),
            events,
        })
    }
}

/// A validated state object: checkpoint plus events in replay order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayPlan {
    pub instance_id: InstanceId,
    pub checkpoint: Vec<PropertyRecord>,
    pub events: Vec<InputEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timer(ts: u64) -> Value {
        json!({ "event": "TIMEREVENT", "timestamp": ts, "tid": ts, "delay": 10, "arguments": [], "handlerId": "h" })
    }

    #[test]
    fn test_wire_field_names() {
        let state: MigrationStateObject = serde_json::from_value(json!({
            "instanceid": "map-1",
            "checkpoint": [{ "name": "zoom", "type": "number", "value": 4 }],
            "inputEvents": [timer(1)]
        }))
        .unwrap();

        assert_eq!(state.instance_id, InstanceId::from("map-1"));
        assert_eq!(state.checkpoint[0].datatype, "number");
        assert_eq!(state.property("zoom"), Some(&json!(4)));

        let back = serde_json::to_value(&state).unwrap();
        assert!(back.get("inputEvents").is_some());
        assert_eq!(back["checkpoint"][0]["type"], "number");
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let state = MigrationStateObject::new("map-1")
            .with_property("zoom", json!(1))
            .with_property("zoom", json!(2));

        let err = state.replay_plan(&MigrationConfig::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateProperty);
    }

    #[test]
    fn test_plan_sorts_events() {
        let state = MigrationStateObject::new("map-1")
            .with_event(timer(300))
            .with_event(timer(100))
            .with_event(timer(200));

        let plan = state.replay_plan(&MigrationConfig::default()).unwrap();
        let order: Vec<f64> = plan.events.iter().map(InputEvent::timestamp).collect();
        assert_eq!(order, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn test_duplicate_timestamps_only_rejected_when_configured() {
        let state = MigrationStateObject::new("map-1").with_event(timer(5)).with_event(timer(5));
        assert!(state.replay_plan(&MigrationConfig::default()).is_ok());

        let strict = MigrationConfig {
            reject_duplicate_timestamps: true,
            ..Default::default()
        };
        assert_eq!(state.replay_plan(&strict).unwrap_err().code(), ErrorCode::InvalidField);
    }

    #[test]
    fn test_parse_many() {
        let json = r#"[{ "instanceid": "a" }, { "instanceid": "b", "checkpoint": [] }]"#;
        let states = MigrationStateObject::parse_many(json).unwrap();
        assert_eq!(states.len(), 2);
        assert!(states[0].input_events.is_empty());
    }

    #[test]
    fn test_bad_event_names_instance() {
        let state = MigrationStateObject::new("map-1").with_event(json!({ "event": "TIMEREVENT", "timestamp": 1 }));
        let err = state.replay_plan(&MigrationConfig::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);
        assert_eq!(err.details().context["instance"], json!("map-1"));
    }
}
