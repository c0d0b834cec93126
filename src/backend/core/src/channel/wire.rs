//! Channel wire payload.
//!
//! ```json
//! { "type": 0, "name": "A_to_B",
//!   "sender":   [{ "cetype": "event",     "cename": "changed", "cid": "map", "instid": "a" }],
//!   "receiver": [{ "cetype": "operation", "cename": "refresh", "cid": "list", "instid": "b" }] }
//! ```
//!
//! Compound bindings are joined with `#` in `cename`.

use serde::{Deserialize, Serialize};

use super::role::{Participant, Publisher, Replier, Requestor, Subscriber};
use super::{BackLinkChannel, Channel, ChannelKind, LinkChannel, PropertyLinkChannel};
use crate::container::InstanceId;
use crate::error::{ErrorCode, ErrorContext, Result, RoamError};

pub const CETYPE_EVENT: &str = "event";
pub const CETYPE_OPERATION: &str = "operation";
pub const CETYPE_PROPERTY: &str = "property";
pub const CETYPE_REQUEST: &str = "request";
pub const CETYPE_REPLY: &str = "reply";

const SEPARATOR: char = '#';

/// One side entry of a channel payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub cetype: String,
    pub cename: String,
    #[serde(default)]
    pub cid: String,
    pub instid: String,
}

impl RoleDescriptor {
    fn new(cetype: &str, cename: String, cid: &str, instid: &InstanceId) -> Self {
        Self {
            cetype: cetype.to_string(),
            cename,
            cid: cid.to_string(),
            instid: instid.to_string(),
        }
    }

    fn split(&self, channel: &str) -> Result<(&str, &str)> {
        self.cename
            .split_once(SEPARATOR)
            .filter(|(a, b)| !a.is_empty() && !b.is_empty())
            .ok_or_else(|| {
                RoamError::malformed_channel(
                    channel,
                    format!("'{}' role '{}' needs a 'first#second' binding", self.cetype, self.cename),
                )
            })
    }

    fn unexpected(&self, channel: &str, side: &str, kind: ChannelKind) -> RoamError {
        RoamError::malformed_channel(
            channel,
            format!("'{}' is not a valid {} role of a {}", self.cetype, side, kind),
        )
    }
}

/// A channel as it travels between runtimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPayload {
    #[serde(rename = "type")]
    pub kind: i64,
    pub name: String,
    #[serde(default)]
    pub sender: Vec<RoleDescriptor>,
    #[serde(default)]
    pub receiver: Vec<RoleDescriptor>,
}

impl ChannelPayload {
    /// Parse a JSON value holding one payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone()).with_error_code(ErrorCode::MalformedChannel)
    }

    /// Parse a JSON document holding either one payload or an array of them.
    pub fn parse_many(json: &str) -> Result<Vec<Self>> {
        let value: serde_json::Value = serde_json::from_str(json).with_error_code(ErrorCode::MalformedChannel)?;
        match value {
            serde_json::Value::Array(items) => items.iter().map(Self::from_value).collect(),
            single => Ok(vec![Self::from_value(&single)?]),
        }
    }
}

impl Channel {
    /// Decode and validate a wire payload.
    pub fn from_payload(payload: &ChannelPayload) -> Result<Self> {
        let kind = ChannelKind::from_number(payload.kind)?;
        let name = payload.name.as_str();

        let channel = match kind {
            ChannelKind::Link => {
                let publishers = payload
                    .sender
                    .iter()
                    .map(|d| match d.cetype.as_str() {
                        CETYPE_EVENT => Ok(Publisher::new(d.instid.as_str(), d.cename.as_str()).with_component(&d.cid)),
                        _ => Err(d.unexpected(name, "sender", kind)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let subscribers = payload
                    .receiver
                    .iter()
                    .map(|d| match d.cetype.as_str() {
                        CETYPE_OPERATION => {
                            Ok(Subscriber::operation(d.instid.as_str(), d.cename.as_str()).with_component(&d.cid))
                        }
                        CETYPE_PROPERTY => {
                            let (operation, property) = d.split(name)?;
                            Ok(Subscriber::property(d.instid.as_str(), operation, property).with_component(&d.cid))
                        }
                        _ => Err(d.unexpected(name, "receiver", kind)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Channel::Link(LinkChannel {
                    name: name.to_string(),
                    publishers,
                    subscribers,
                })
            }
            ChannelKind::BackLink => {
                let requestors = payload
                    .sender
                    .iter()
                    .map(|d| match d.cetype.as_str() {
                        CETYPE_REQUEST => {
                            let (event, callback) = d.split(name)?;
                            Ok(Requestor::new(d.instid.as_str(), event, callback).with_component(&d.cid))
                        }
                        _ => Err(d.unexpected(name, "sender", kind)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let repliers = payload
                    .receiver
                    .iter()
                    .map(|d| match d.cetype.as_str() {
                        CETYPE_REPLY => {
                            let (operation, return_event) = d.split(name)?;
                            Ok(Replier::new(d.instid.as_str(), operation, return_event).with_component(&d.cid))
                        }
                        _ => Err(d.unexpected(name, "receiver", kind)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Channel::BackLink(BackLinkChannel {
                    name: name.to_string(),
                    requestors,
                    repliers,
                })
            }
            ChannelKind::PropertyLink => {
                let decode = |side: &'static str, list: &[RoleDescriptor]| {
                    list.iter()
                        .map(|d| match d.cetype.as_str() {
                            CETYPE_PROPERTY => {
                                let (property, operation) = d.split(name)?;
                                Ok(Participant::new(d.instid.as_str(), property, operation).with_component(&d.cid))
                            }
                            _ => Err(d.unexpected(name, side, kind)),
                        })
                        .collect::<Result<Vec<_>>>()
                };
                Channel::PropertyLink(PropertyLinkChannel {
                    name: name.to_string(),
                    senders: decode("sender", &payload.sender)?,
                    receivers: decode("receiver", &payload.receiver)?,
                })
            }
        };

        channel.validate()?;
        Ok(channel)
    }

    /// Encode into the wire payload.
    pub fn to_payload(&self) -> ChannelPayload {
        let (sender, receiver) = match self {
            Channel::Link(c) => (
                c.publishers
                    .iter()
                    .map(|p| RoleDescriptor::new(CETYPE_EVENT, p.event.clone(), &p.component, &p.instance))
                    .collect(),
                c.subscribers
                    .iter()
                    .map(|s| match s.target.property() {
                        None => RoleDescriptor::new(CETYPE_OPERATION, s.target.to_string(), &s.component, &s.instance),
                        Some(_) => RoleDescriptor::new(CETYPE_PROPERTY, s.target.to_string(), &s.component, &s.instance),
                    })
                    .collect(),
            ),
            Channel::BackLink(c) => (
                c.requestors
                    .iter()
                    .map(|r| {
                        RoleDescriptor::new(CETYPE_REQUEST, join(&r.event, &r.callback), &r.component, &r.instance)
                    })
                    .collect(),
                c.repliers
                    .iter()
                    .map(|r| {
                        RoleDescriptor::new(CETYPE_REPLY, join(&r.operation, &r.return_event), &r.component, &r.instance)
                    })
                    .collect(),
            ),
            Channel::PropertyLink(c) => {
                let encode = |list: &[Participant]| {
                    list.iter()
                        .map(|p| {
                            RoleDescriptor::new(CETYPE_PROPERTY, join(&p.property, &p.operation), &p.component, &p.instance)
                        })
                        .collect::<Vec<_>>()
                };
                (encode(&c.senders), encode(&c.receivers))
            }
        };

        ChannelPayload {
            kind: self.kind().number(),
            name: self.name().to_string(),
            sender,
            receiver,
        }
    }
}

fn join(first: &str, second: &str) -> String {
    format!("{}{}{}", first, SEPARATOR, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn back_link_payload() -> ChannelPayload {
        ChannelPayload::from_value(&json!({
            "type": 1,
            "name": "geo_lookup",
            "sender": [{ "cetype": "request", "cename": "lookup#showResult", "cid": "search", "instid": "s1" }],
            "receiver": [{ "cetype": "reply", "cename": "geocode#geocoded", "cid": "geo", "instid": "g1" }]
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_back_link() {
        let channel = Channel::from_payload(&back_link_payload()).unwrap();
        match &channel {
            Channel::BackLink(c) => {
                assert_eq!(c.requestors[0].callback, "showResult");
                assert_eq!(c.repliers[0].return_event, "geocoded");
                assert_eq!(c.repliers[0].component, "geo");
            }
            other => panic!("expected BackLink, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_payload_survives_encoding() {
        let payload = back_link_payload();
        let channel = Channel::from_payload(&payload).unwrap();
        assert_eq!(channel.to_payload(), payload);
    }

    #[test]
    fn test_property_subscriber_on_link() {
        let payload = ChannelPayload::from_value(&json!({
            "type": 0,
            "name": "sel",
            "sender": [{ "cetype": "event", "cename": "selected", "cid": "list", "instid": "l1" }],
            "receiver": [{ "cetype": "property", "cename": "highlight#selection", "cid": "map", "instid": "m1" }]
        }))
        .unwrap();

        let channel = Channel::from_payload(&payload).unwrap();
        if let Channel::Link(c) = &channel {
            assert_eq!(c.subscribers[0].target.property(), Some("selection"));
        }
        assert_eq!(channel.to_payload(), payload);
    }

    #[test]
    fn test_unknown_type_number() {
        let payload = ChannelPayload {
            kind: 7,
            name: "x".into(),
            sender: vec![],
            receiver: vec![],
        };
        assert_eq!(
            Channel::from_payload(&payload).unwrap_err().code(),
            ErrorCode::UnknownChannelType
        );
    }

    #[test]
    fn test_wrong_cetype_for_side() {
        let payload = ChannelPayload::from_value(&json!({
            "type": 0,
            "name": "bad",
            "sender": [{ "cetype": "operation", "cename": "x", "cid": "", "instid": "a" }],
            "receiver": [{ "cetype": "operation", "cename": "y", "cid": "", "instid": "b" }]
        }))
        .unwrap();
        assert_eq!(
            Channel::from_payload(&payload).unwrap_err().code(),
            ErrorCode::MalformedChannel
        );
    }

    #[test]
    fn test_compound_binding_required() {
        let payload = ChannelPayload::from_value(&json!({
            "type": 2,
            "name": "zoom",
            "sender": [{ "cetype": "property", "cename": "zoom", "cid": "", "instid": "a" }],
            "receiver": [{ "cetype": "property", "cename": "zoom#setZoom", "cid": "", "instid": "b" }]
        }))
        .unwrap();
        assert!(Channel::from_payload(&payload).is_err());
    }

    #[test]
    fn test_parse_many_accepts_single_object() {
        let json = r#"{ "type": 0, "name": "one",
            "sender": [{ "cetype": "event", "cename": "e", "instid": "a" }],
            "receiver": [{ "cetype": "operation", "cename": "o", "instid": "b" }] }"#;
        let payloads = ChannelPayload::parse_many(json).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].sender[0].cid, "");
    }
}
