//! Runtime request and response types.
//!
//! Requests come from the application manager that decides where
//! components run. Each one names an action and carries an action-specific
//! payload; the runtime answers with a status and a prepare code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::channel::ChannelPayload;
use crate::container::InstanceId;
use crate::error::{ErrorCode, ErrorContext, Result, RoamError};
use crate::migration::MigrationStateObject;

// ═══════════════════════════════════════════════════════════════════════════════
// Requests (Manager -> Runtime)
// ═══════════════════════════════════════════════════════════════════════════════

/// Action requested of a runtime.
///
/// Each change runs in two steps: `PREP_*` checks and freezes, `CMIT_*`
/// applies, `ABRT_*` undoes a prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeAction {
    PrepMigrate,
    CmitMigrate,
    AbrtMigrate,
    PrepRealize,
    CmitRealize,
    AbrtRealize,
    PrepModifychannel,
    CmitModifychannel,
}

impl RuntimeAction {
    pub const ALL: [RuntimeAction; 8] = [
        RuntimeAction::PrepMigrate,
        RuntimeAction::CmitMigrate,
        RuntimeAction::AbrtMigrate,
        RuntimeAction::PrepRealize,
        RuntimeAction::CmitRealize,
        RuntimeAction::AbrtRealize,
        RuntimeAction::PrepModifychannel,
        RuntimeAction::CmitModifychannel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrepMigrate => "PREP_MIGRATE",
            Self::CmitMigrate => "CMIT_MIGRATE",
            Self::AbrtMigrate => "ABRT_MIGRATE",
            Self::PrepRealize => "PREP_REALIZE",
            Self::CmitRealize => "CMIT_REALIZE",
            Self::AbrtRealize => "ABRT_REALIZE",
            Self::PrepModifychannel => "PREP_MODIFYCHANNEL",
            Self::CmitModifychannel => "CMIT_MODIFYCHANNEL",
        }
    }

    pub fn parse(action: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == action)
            .ok_or_else(|| RoamError::unknown_action(action))
    }

    pub fn is_prepare(&self) -> bool {
        matches!(self, Self::PrepMigrate | Self::PrepRealize | Self::PrepModifychannel)
    }
}

impl std::fmt::Display for RuntimeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request addressed to this runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRequest {
    #[serde(default)]
    pub id: String,
    pub action: RuntimeAction,
    #[serde(default)]
    pub payload: Value,
}

impl RuntimeRequest {
    pub fn new(id: impl Into<String>, action: RuntimeAction, payload: Value) -> Self {
        Self {
            id: id.into(),
            action,
            payload,
        }
    }

    /// Build a request with a fresh random id.
    pub fn generate(action: RuntimeAction, payload: Value) -> Self {
        Self::new(Uuid::new_v4().to_string(), action, payload)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).with_error_code(ErrorCode::MalformedMessage)?;
        Self::from_value(&value)
    }

    /// Decode a request, reporting an unknown action as such rather than as
    /// a generic decode failure.
    pub fn from_value(value: &Value) -> Result<Self> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| RoamError::missing_field("RuntimeRequest", "action"))?;
        let action = RuntimeAction::parse(action)?;

        let id = match value.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => String::new(),
        };

        Ok(Self {
            id,
            action,
            payload: value.get("payload").cloned().unwrap_or(Value::Null),
        })
    }

    /// Decode the payload as `T`; a missing payload decodes as `T::default()`.
    pub fn payload_as<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.payload.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.payload.clone())
            .with_error_code(ErrorCode::MalformedMessage)
            .map_err(|e| e.with_context("action", self.action.as_str()))
    }
}

/// Payload of `PREP_MODIFYCHANNEL` and `CMIT_MODIFYCHANNEL`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyChannelPayload {
    #[serde(default)]
    pub add: Vec<ChannelPayload>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Events that reached the source after a component's state was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamBatch {
    #[serde(rename = "instanceid")]
    pub instance_id: InstanceId,
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Payload of the migrate and realize actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationPayload {
    /// Instances being moved or realized
    #[serde(default)]
    pub instances: Vec<InstanceId>,
    /// State objects to inject on commit
    #[serde(default)]
    pub states: Vec<MigrationStateObject>,
    #[serde(default)]
    pub downstream: Vec<DownstreamBatch>,
    /// Instances that left this device with the commit
    #[serde(default)]
    pub departed: Vec<InstanceId>,
}

impl MigrationPayload {
    pub fn has_state_for(&self, instance: &InstanceId) -> bool {
        self.states.iter().any(|s| &s.instance_id == instance)
    }

    /// Every instance the payload touches, listed or carrying state, without
    /// repeats.
    pub fn affected_instances(&self) -> Vec<InstanceId> {
        let mut all: Vec<InstanceId> = Vec::new();
        for instance in self.instances.iter().chain(self.states.iter().map(|s| &s.instance_id)) {
            if !all.contains(instance) {
                all.push(instance.clone());
            }
        }
        all
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Responses (Runtime -> Manager)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Outcome code reported with every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrepareCode {
    ChannelIntegrationSuccess,
    ChannelIntegrationFailure,
    NoComponentExecutable,
    StateInjectionSuccess,
    StateInjectionFailure,
    MigrationPrepared,
    MigrationAborted,
}

impl PrepareCode {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ChannelIntegrationFailure | Self::NoComponentExecutable | Self::StateInjectionFailure
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub code: PrepareCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Answer to a [`RuntimeRequest`], carrying the request id back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeResponse {
    pub id: String,
    pub status: ResponseStatus,
    pub payload: ResponsePayload,
}

impl RuntimeResponse {
    pub fn success(id: impl Into<String>, code: PrepareCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ResponseStatus::Success,
            payload: ResponsePayload {
                code,
                message: message.into(),
                error_code: None,
                data: None,
            },
        }
    }

    pub fn failure(id: impl Into<String>, code: PrepareCode, error: &RoamError) -> Self {
        Self {
            id: id.into(),
            status: ResponseStatus::Failure,
            payload: ResponsePayload {
                code,
                message: error.message().to_string(),
                error_code: Some(error.code()),
                data: None,
            },
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.payload.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn code(&self) -> PrepareCode {
        self.payload.code
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(
            serde_json::to_value(RuntimeAction::PrepModifychannel).unwrap(),
            json!("PREP_MODIFYCHANNEL")
        );
        for action in RuntimeAction::ALL {
            let wire = serde_json::to_value(action).unwrap();
            assert_eq!(wire, json!(action.as_str()));
            assert_eq!(RuntimeAction::parse(action.as_str()).unwrap(), action);
        }
    }

    #[test]
    fn test_unknown_action() {
        let err = RuntimeRequest::from_json(r#"{"id":"1","action":"PREP_TELEPORT"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownAction);

        let err = RuntimeRequest::from_json(r#"{"id":"1"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    }

    #[test]
    fn test_request_numeric_id_and_missing_payload() {
        let request = RuntimeRequest::from_json(r#"{"id":7,"action":"ABRT_MIGRATE"}"#).unwrap();
        assert_eq!(request.id, "7");
        assert_eq!(request.action, RuntimeAction::AbrtMigrate);

        let payload: MigrationPayload = request.payload_as().unwrap();
        assert!(payload.instances.is_empty());
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = RuntimeRequest::generate(RuntimeAction::PrepRealize, Value::Null);
        let b = RuntimeRequest::generate(RuntimeAction::PrepRealize, Value::Null);
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_affected_instances_dedup() {
        let payload: MigrationPayload = serde_json::from_value(json!({
            "instances": ["map-1", "list-1"],
            "states": [{"instanceid": "map-1", "checkpoint": [], "inputEvents": []}]
        }))
        .unwrap();

        assert_eq!(
            payload.affected_instances(),
            vec![InstanceId::from("map-1"), InstanceId::from("list-1")]
        );
        assert!(payload.has_state_for(&InstanceId::from("map-1")));
    }

    #[test]
    fn test_failure_response_shape() {
        let err = RoamError::container_not_found("map-1");
        let response = RuntimeResponse::failure("42", PrepareCode::StateInjectionFailure, &err);
        let wire = serde_json::to_value(&response).unwrap();

        assert_eq!(wire["status"], "FAILURE");
        assert_eq!(wire["payload"]["code"], "STATE_INJECTION_FAILURE");
        assert_eq!(wire["payload"]["error_code"], "CONTAINER_NOT_FOUND");
        assert!(wire["payload"].get("data").is_none());
    }
}
