//! Component messages routed over channels.
//!
//! A message is an immutable value. Every channel that delivers it works on
//! its own clone, so a delivery can never observe edits made by another.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ErrorContext, Result};

/// Routing and typing header of a component message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Event (or property) name the message is published under
    pub name: String,

    /// Application-level status flag
    #[serde(default)]
    pub status: Option<String>,

    /// Correlates a BackLink reply with the request that caused it
    #[serde(default)]
    pub callback_id: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Declared body datatype
    #[serde(default)]
    pub datatype: Option<String>,

    /// Minimum number of synchronised receivers before the sender proceeds
    #[serde(default)]
    pub sync_threshold: Option<u32>,
}

/// A message emitted by a component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMessage {
    pub header: MessageHeader,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// The `{ "message": { header, body } }` envelope used on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageEnvelope {
    message: ComponentMessage,
}

impl ComponentMessage {
    pub fn new(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            header: MessageHeader {
                name: name.into(),
                status: None,
                callback_id: None,
                description: None,
                datatype: None,
                sync_threshold: None,
            },
            body,
        }
    }

    pub fn with_callback_id(mut self, id: impl Into<String>) -> Self {
        self.header.callback_id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.header.status = Some(status.into());
        self
    }

    pub fn with_datatype(mut self, datatype: impl Into<String>) -> Self {
        self.header.datatype = Some(datatype.into());
        self
    }

    /// Event name used for publisher lookup.
    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn callback_id(&self) -> Option<&str> {
        self.header.callback_id.as_deref()
    }

    /// Decode the nested wire envelope.
    ///
    /// Accepts the envelope either as a JSON object or as a JSON string
    /// holding the serialized object, since captured call events carry the
    /// latter.
    pub fn from_wire(value: &serde_json::Value) -> Result<Self> {
        let envelope: MessageEnvelope = match value {
            serde_json::Value::String(raw) => {
                serde_json::from_str(raw).with_error_code(ErrorCode::MalformedMessage)?
            }
            other => serde_json::from_value(other.clone()).with_error_code(ErrorCode::MalformedMessage)?,
        };
        Ok(envelope.message)
    }

    /// Encode into the nested wire envelope.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({ "message": self })
    }
}
