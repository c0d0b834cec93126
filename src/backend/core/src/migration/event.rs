//! Captured input events.
//!
//! An input event is something a component had received but not finished
//! processing when its state was captured: an inbound call, an XHR-style
//! service response, or a timer. On the wire each event is a flat JSON
//! object tagged by its `event` discriminant; [`InputEvent::from_wire`]
//! turns it into a typed variant and rejects records that lack a field
//! their variant needs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::ComponentMessage;
use crate::error::{Result, RoamError};

// =============================================================================
// Discriminants
// =============================================================================

pub const CALL_EVENT: &str = "CALLEVENT";
pub const SERVICE_RESPONSE_EVENT: &str = "XHREVENT";
pub const INTERVAL_EVENT: &str = "INTERVALEVENT";
pub const TIMEOUT_EVENT: &str = "TIMEREVENT";
pub const START_INTERVAL_EVENT: &str = "STARTINTERVALEVENT";

/// Kind of an input event, as named by its wire discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputEventKind {
    #[serde(rename = "CALLEVENT")]
    Call,
    #[serde(rename = "XHREVENT")]
    ServiceResponse,
    #[serde(rename = "INTERVALEVENT")]
    Interval,
    #[serde(rename = "TIMEREVENT")]
    Timeout,
    #[serde(rename = "STARTINTERVALEVENT")]
    StartInterval,
}

impl InputEventKind {
    pub fn parse(discriminant: &str) -> Result<Self> {
        match discriminant {
            CALL_EVENT => Ok(Self::Call),
            SERVICE_RESPONSE_EVENT => Ok(Self::ServiceResponse),
            INTERVAL_EVENT => Ok(Self::Interval),
            TIMEOUT_EVENT => Ok(Self::Timeout),
            START_INTERVAL_EVENT => Ok(Self::StartInterval),
            other => Err(RoamError::unknown_event_kind(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => CALL_EVENT,
            Self::ServiceResponse => SERVICE_RESPONSE_EVENT,
            Self::Interval => INTERVAL_EVENT,
            Self::Timeout => TIMEOUT_EVENT,
            Self::StartInterval => START_INTERVAL_EVENT,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::Call => "CallEvent",
            Self::ServiceResponse => "ServiceResponseEvent",
            Self::Interval => "IntervalEvent",
            Self::Timeout => "TimeoutEvent",
            Self::StartInterval => "StartIntervalEvent",
        }
    }
}

impl std::fmt::Display for InputEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Handler Context
// =============================================================================

/// Identifies the internal handler that must reprocess an event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerContext {
    pub handler: String,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl HandlerContext {
    pub fn named(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            ..Default::default()
        }
    }

    /// The wire carries the context as a string. Usually it is a serialized
    /// object; a bare string is taken as the handler name.
    fn from_wire(value: &Value) -> Result<Self> {
        match value {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(obj @ Value::Object(_)) => Self::from_object(&obj),
                _ => Ok(Self::named(raw.clone())),
            },
            obj @ Value::Object(_) => Self::from_object(obj),
            _ => Err(RoamError::invalid_field("InputEvent", "handlerContext", "a string or object")),
        }
    }

    fn from_object(value: &Value) -> Result<Self> {
        let handler = value
            .get("handler")
            .or_else(|| value.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| RoamError::missing_field("HandlerContext", "handler"))?;
        let context_id = value.get("contextId").and_then(id_string);
        let arguments = value
            .get("arguments")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            handler: handler.to_string(),
            context_id,
            arguments,
        })
    }

    fn to_wire(&self) -> Value {
        Value::String(serde_json::to_string(self).unwrap_or_default())
    }
}

// =============================================================================
// Variants
// =============================================================================

/// An inbound operation call that had not been processed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub timestamp: f64,
    pub component_id: String,
    pub instance_id: String,
    /// Operation name
    pub name: String,
    /// Element type (operation, property, ...)
    pub element_type: String,
    pub message: ComponentMessage,
    pub handler_context: Option<HandlerContext>,
}

/// A service (XHR-like) response that arrived but was not handled.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponseEvent {
    pub timestamp: f64,
    pub ready_state: u64,
    pub status: u64,
    pub status_text: String,
    pub response: Value,
    pub response_type: String,
    pub response_headers: Value,
    pub handler_context: Option<HandlerContext>,
}

/// A pending tick of a running interval.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalEvent {
    pub timestamp: f64,
    pub interval_id: String,
    /// Period in milliseconds
    pub period_ms: u64,
    /// Ticks already fired
    pub count: u64,
    pub arguments: Vec<Value>,
    pub handler_id: String,
    pub handler_context: Option<HandlerContext>,
}

/// A one-shot timer that had not fired.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutEvent {
    pub timestamp: f64,
    pub timer_id: String,
    pub delay_ms: u64,
    pub arguments: Vec<Value>,
    pub handler_id: String,
    pub handler_context: Option<HandlerContext>,
}

/// Registration of an interval that must be restarted.
#[derive(Debug, Clone, PartialEq)]
pub struct StartIntervalEvent {
    pub timestamp: f64,
    pub interval_id: String,
    pub delay_ms: u64,
    pub handler_context: HandlerContext,
}

/// Events handled by the runtime (timer) proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Interval(IntervalEvent),
    Timeout(TimeoutEvent),
    StartInterval(StartIntervalEvent),
}

impl RuntimeEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            RuntimeEvent::Interval(e) => e.timestamp,
            RuntimeEvent::Timeout(e) => e.timestamp,
            RuntimeEvent::StartInterval(e) => e.timestamp,
        }
    }
}

/// A typed input event.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Call(CallEvent),
    ServiceResponse(ServiceResponseEvent),
    Runtime(RuntimeEvent),
}

impl InputEvent {
    pub fn kind(&self) -> InputEventKind {
        match self {
            InputEvent::Call(_) => InputEventKind::Call,
            InputEvent::ServiceResponse(_) => InputEventKind::ServiceResponse,
            InputEvent::Runtime(RuntimeEvent::Interval(_)) => InputEventKind::Interval,
            InputEvent::Runtime(RuntimeEvent::Timeout(_)) => InputEventKind::Timeout,
            InputEvent::Runtime(RuntimeEvent::StartInterval(_)) => InputEventKind::StartInterval,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            InputEvent::Call(e) => e.timestamp,
            InputEvent::ServiceResponse(e) => e.timestamp,
            InputEvent::Runtime(e) => e.timestamp(),
        }
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        match self {
            InputEvent::Call(e) => e.timestamp = timestamp,
            InputEvent::ServiceResponse(e) => e.timestamp = timestamp,
            InputEvent::Runtime(RuntimeEvent::Interval(e)) => e.timestamp = timestamp,
            InputEvent::Runtime(RuntimeEvent::Timeout(e)) => e.timestamp = timestamp,
            InputEvent::Runtime(RuntimeEvent::StartInterval(e)) => e.timestamp = timestamp,
        }
    }

    /// Build a typed event from its wire record, validating every field the
    /// variant requires.
    pub fn from_wire(record: &Value) -> Result<Self> {
        let obj = record
            .as_object()
            .ok_or_else(|| RoamError::invalid_field("InputEvent", "record", "a JSON object"))?;

        let discriminant = obj
            .get("event")
            .ok_or_else(|| RoamError::missing_field("InputEvent", "event"))?
            .as_str()
            .ok_or_else(|| RoamError::invalid_field("InputEvent", "event", "a string"))?;
        let kind = InputEventKind::parse(discriminant)?;
        let timestamp = wire_timestamp(record)?;

        let fields = Fields {
            variant: kind.variant_name(),
            obj,
        };
        let handler_context = fields.optional("handlerContext").map(HandlerContext::from_wire).transpose()?;

        let event = match kind {
            InputEventKind::Call => InputEvent::Call(CallEvent {
                timestamp,
                component_id: fields.id("componentid")?,
                instance_id: fields.id("instanceid")?,
                name: fields.string("name")?,
                element_type: fields.string("type")?,
                message: ComponentMessage::from_wire(fields.value("message")?)?,
                handler_context,
            }),
            InputEventKind::ServiceResponse => InputEvent::ServiceResponse(ServiceResponseEvent {
                timestamp,
                ready_state: fields.number("state")?,
                status: fields.number("status")?,
                status_text: fields.string("statusText")?,
                response: fields.value("response")?.clone(),
                response_type: fields.string("responseType")?,
                response_headers: fields.value("responseHeaders")?.clone(),
                handler_context,
            }),
            InputEventKind::Interval => InputEvent::Runtime(RuntimeEvent::Interval(IntervalEvent {
                timestamp,
                interval_id: fields.id("iid")?,
                period_ms: fields.number("interval")?,
                count: fields.number("count")?,
                arguments: fields.array("arguments")?,
                handler_id: fields.id("handlerId")?,
                handler_context,
            })),
            InputEventKind::Timeout => InputEvent::Runtime(RuntimeEvent::Timeout(TimeoutEvent {
                timestamp,
                timer_id: fields.id("tid")?,
                delay_ms: fields.number("delay")?,
                arguments: fields.array("arguments")?,
                handler_id: fields.id("handlerId")?,
                handler_context,
            })),
            InputEventKind::StartInterval => InputEvent::Runtime(RuntimeEvent::StartInterval(StartIntervalEvent {
                timestamp,
                interval_id: fields.id("intervalId")?,
                delay_ms: fields.number("delay")?,
                handler_context: handler_context
                    .ok_or_else(|| RoamError::missing_field("StartIntervalEvent", "handlerContext"))?,
            })),
        };

        Ok(event)
    }

    /// Encode back into the flat wire record.
    pub fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("event".into(), Value::from(self.kind().as_str()));
        obj.insert("timestamp".into(), Value::from(self.timestamp()));

        let handler_context = match self {
            InputEvent::Call(e) => {
                obj.insert("componentid".into(), Value::from(e.component_id.clone()));
                obj.insert("instanceid".into(), Value::from(e.instance_id.clone()));
                obj.insert("name".into(), Value::from(e.name.clone()));
                obj.insert("type".into(), Value::from(e.element_type.clone()));
                obj.insert("message".into(), e.message.to_wire());
                e.handler_context.as_ref()
            }
            InputEvent::ServiceResponse(e) => {
                obj.insert("state".into(), Value::from(e.ready_state));
                obj.insert("status".into(), Value::from(e.status));
                obj.insert("statusText".into(), Value::from(e.status_text.clone()));
                obj.insert("response".into(), e.response.clone());
                obj.insert("responseType".into(), Value::from(e.response_type.clone()));
                obj.insert("responseHeaders".into(), e.response_headers.clone());
                e.handler_context.as_ref()
            }
            InputEvent::Runtime(RuntimeEvent::Interval(e)) => {
                obj.insert("iid".into(), Value::from(e.interval_id.clone()));
                obj.insert("interval".into(), Value::from(e.period_ms));
                obj.insert("count".into(), Value::from(e.count));
                obj.insert("arguments".into(), Value::from(e.arguments.clone()));
                obj.insert("handlerId".into(), Value::from(e.handler_id.clone()));
                e.handler_context.as_ref()
            }
            InputEvent::Runtime(RuntimeEvent::Timeout(e)) => {
                obj.insert("tid".into(), Value::from(e.timer_id.clone()));
                obj.insert("delay".into(), Value::from(e.delay_ms));
                obj.insert("arguments".into(), Value::from(e.arguments.clone()));
                obj.insert("handlerId".into(), Value::from(e.handler_id.clone()));
                e.handler_context.as_ref()
            }
            InputEvent::Runtime(RuntimeEvent::StartInterval(e)) => {
                obj.insert("intervalId".into(), Value::from(e.interval_id.clone()));
                obj.insert("delay".into(), Value::from(e.delay_ms));
                Some(&e.handler_context)
            }
        };

        if let Some(ctx) = handler_context {
            obj.insert("handlerContext".into(), ctx.to_wire());
        }
        Value::Object(obj)
    }
}

/// Read the replay timestamp of a raw record without decoding the variant.
pub fn wire_timestamp(record: &Value) -> Result<f64> {
    let ts = record
        .get("timestamp")
        .ok_or_else(|| RoamError::missing_field("InputEvent", "timestamp"))?
        .as_f64()
        .ok_or_else(|| RoamError::invalid_field("InputEvent", "timestamp", "a number"))?;
    if !ts.is_finite() {
        return Err(RoamError::invalid_field("InputEvent", "timestamp", "a finite number"));
    }
    Ok(ts)
}

/// Sort events ascending by timestamp. Equal timestamps keep their
/// supplied order.
pub fn sort_by_timestamp(events: &mut [InputEvent]) {
    events.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Required-field reader over one wire record.
struct Fields<'a> {
    variant: &'static str,
    obj: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn optional(&self, field: &'static str) -> Option<&'a Value> {
        self.obj.get(field)
    }

    fn value(&self, field: &'static str) -> Result<&'a Value> {
        self.obj
            .get(field)
            .ok_or_else(|| RoamError::missing_field(self.variant, field))
    }

    fn string(&self, field: &'static str) -> Result<String> {
        self.value(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RoamError::invalid_field(self.variant, field, "a string"))
    }

    /// Timer and handler ids are numbers in some runtimes, strings in others.
    fn id(&self, field: &'static str) -> Result<String> {
        id_string(self.value(field)?).ok_or_else(|| RoamError::invalid_field(self.variant, field, "a string or number"))
    }

    fn number(&self, field: &'static str) -> Result<u64> {
        let value = self.value(field)?;
        value
            .as_u64()
            .or_else(|| {
                value
                    .as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| RoamError::invalid_field(self.variant, field, "a non-negative integer"))
    }

    fn array(&self, field: &'static str) -> Result<Vec<Value>> {
        self.value(field)?
            .as_array()
            .cloned()
            .ok_or_else(|| RoamError::invalid_field(self.variant, field, "an array"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn timeout_record(ts: f64) -> Value {
        json!({
            "event": "TIMEREVENT",
            "timestamp": ts,
            "tid": 12,
            "delay": 250,
            "arguments": ["a"],
            "handlerId": "h-1",
            "handlerContext": "refresh"
        })
    }

    #[test]
    fn test_decode_timeout() {
        let event = InputEvent::from_wire(&timeout_record(200.0)).unwrap();
        match event {
            InputEvent::Runtime(RuntimeEvent::Timeout(t)) => {
                assert_eq!(t.timer_id, "12");
                assert_eq!(t.delay_ms, 250);
                assert_eq!(t.handler_context, Some(HandlerContext::named("refresh")));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_call_with_string_message() {
        let message = json!({ "message": { "header": { "name": "select" }, "body": 3 } }).to_string();
        let record = json!({
            "event": "CALLEVENT",
            "timestamp": 100,
            "componentid": "map",
            "instanceid": "map-1",
            "name": "select",
            "type": "operation",
            "message": message
        });

        let event = InputEvent::from_wire(&record).unwrap();
        assert_eq!(event.kind(), InputEventKind::Call);
        if let InputEvent::Call(call) = event {
            assert_eq!(call.message.name(), "select");
            assert_eq!(call.message.body, json!(3));
        }
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let mut record = timeout_record(1.0);
        record.as_object_mut().unwrap().remove("tid");

        let err = InputEvent::from_wire(&record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);
        assert_eq!(err.details().context["field"], json!("tid"));
    }

    #[test]
    fn test_fractional_delay_is_rejected() {
        let mut record = timeout_record(1.0);
        record["delay"] = json!(2.7);

        let err = InputEvent::from_wire(&record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidField);
        assert_eq!(err.details().context["field"], json!("delay"));

        record["delay"] = json!(250.0);
        match InputEvent::from_wire(&record).unwrap() {
            InputEvent::Runtime(RuntimeEvent::Timeout(t)) => assert_eq!(t.delay_ms, 250),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_missing_timestamp_is_rejected() {
        let err = InputEvent::from_wire(&json!({ "event": "TIMEREVENT" })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = InputEvent::from_wire(&json!({ "event": "MOUSEEVENT", "timestamp": 1 })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEventKind);
    }

    #[test]
    fn test_start_interval_requires_handler_context() {
        let record = json!({ "event": "STARTINTERVALEVENT", "timestamp": 5, "intervalId": "i", "delay": 10 });
        let err = InputEvent::from_wire(&record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    }

    #[test]
    fn test_handler_context_object_string() {
        let ctx = json!({ "handler": "poll", "contextId": 4, "arguments": [1, 2] }).to_string();
        let record = json!({ "event": "STARTINTERVALEVENT", "timestamp": 5, "intervalId": "i", "delay": 10, "handlerContext": ctx });

        let event = InputEvent::from_wire(&record).unwrap();
        if let InputEvent::Runtime(RuntimeEvent::StartInterval(e)) = event {
            assert_eq!(e.handler_context.handler, "poll");
            assert_eq!(e.handler_context.context_id.as_deref(), Some("4"));
            assert_eq!(e.handler_context.arguments.len(), 2);
        } else {
            panic!("expected start interval");
        }
    }

    #[test]
    fn test_sort_is_stable_on_equal_timestamps() {
        let mut events = vec![
            InputEvent::from_wire(&timeout_record(300.0)).unwrap(),
            InputEvent::from_wire(&json!({
                "event": "INTERVALEVENT", "timestamp": 100, "iid": "first", "interval": 10,
                "count": 0, "arguments": [], "handlerId": "h"
            })).unwrap(),
            InputEvent::from_wire(&json!({
                "event": "INTERVALEVENT", "timestamp": 100, "iid": "second", "interval": 10,
                "count": 0, "arguments": [], "handlerId": "h"
            })).unwrap(),
        ];

        sort_by_timestamp(&mut events);

        let order: Vec<f64> = events.iter().map(InputEvent::timestamp).collect();
        assert_eq!(order, vec![100.0, 100.0, 300.0]);
        match &events[0] {
            InputEvent::Runtime(RuntimeEvent::Interval(i)) => assert_eq!(i.interval_id, "first"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_wire_encoding_decodes_back() {
        let original = InputEvent::from_wire(&timeout_record(42.0)).unwrap();
        let decoded = InputEvent::from_wire(&original.to_wire()).unwrap();
        assert_eq!(original, decoded);
    }
}
