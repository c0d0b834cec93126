//! Channel model.
//!
//! A channel is a named, typed link between component roles. Channels are
//! immutable once built; the broker keeps wiring and block state beside
//! them.

pub mod message;
pub mod role;
pub mod wire;

use serde::{Deserialize, Serialize};

use crate::container::InstanceId;
use crate::error::{Result, RoamError};

pub use message::{ComponentMessage, MessageHeader};
pub use role::{Participant, Publisher, Replier, Requestor, Subscriber, SubscriberTarget};
pub use wire::{ChannelPayload, RoleDescriptor};

// ═══════════════════════════════════════════════════════════════════════════════
// Channel Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// Channel topology, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Link = 0,
    BackLink = 1,
    PropertyLink = 2,
}

impl ChannelKind {
    pub fn from_number(n: i64) -> Result<Self> {
        match n {
            0 => Ok(ChannelKind::Link),
            1 => Ok(ChannelKind::BackLink),
            2 => Ok(ChannelKind::PropertyLink),
            other => Err(RoamError::unknown_channel_type(other)),
        }
    }

    pub fn number(&self) -> i64 {
        *self as i64
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Link => write!(f, "Link"),
            ChannelKind::BackLink => write!(f, "BackLink"),
            ChannelKind::PropertyLink => write!(f, "PropertyLink"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Channel Shapes
// ═══════════════════════════════════════════════════════════════════════════════

/// Publisher to subscriber event link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkChannel {
    pub name: String,
    pub publishers: Vec<Publisher>,
    pub subscribers: Vec<Subscriber>,
}

/// Requestor to replier call/response link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackLinkChannel {
    pub name: String,
    pub requestors: Vec<Requestor>,
    pub repliers: Vec<Replier>,
}

/// Bidirectional property mirror.
///
/// The wire lists participants on both sides; both lists are kept so a
/// payload encodes back exactly as it arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyLinkChannel {
    pub name: String,
    pub senders: Vec<Participant>,
    pub receivers: Vec<Participant>,
}

impl PropertyLinkChannel {
    /// Every distinct participant, senders first.
    pub fn participants(&self) -> Vec<&Participant> {
        let mut out: Vec<&Participant> = Vec::new();
        for p in self.senders.iter().chain(self.receivers.iter()) {
            if !out.iter().any(|q| q.instance == p.instance && q.property == p.property) {
                out.push(p);
            }
        }
        out
    }
}

/// A channel of one of the three topologies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    Link(LinkChannel),
    BackLink(BackLinkChannel),
    PropertyLink(PropertyLinkChannel),
}

impl Channel {
    pub fn link(name: impl Into<String>, publishers: Vec<Publisher>, subscribers: Vec<Subscriber>) -> Result<Self> {
        let channel = Channel::Link(LinkChannel {
            name: name.into(),
            publishers,
            subscribers,
        });
        channel.validate()?;
        Ok(channel)
    }

    pub fn back_link(name: impl Into<String>, requestors: Vec<Requestor>, repliers: Vec<Replier>) -> Result<Self> {
        let channel = Channel::BackLink(BackLinkChannel {
            name: name.into(),
            requestors,
            repliers,
        });
        channel.validate()?;
        Ok(channel)
    }

    /// PropertyLink with the same participants on both sides.
    pub fn property_link(name: impl Into<String>, participants: Vec<Participant>) -> Result<Self> {
        let channel = Channel::PropertyLink(PropertyLinkChannel {
            name: name.into(),
            senders: participants.clone(),
            receivers: participants,
        });
        channel.validate()?;
        Ok(channel)
    }

    pub fn name(&self) -> &str {
        match self {
            Channel::Link(c) => &c.name,
            Channel::BackLink(c) => &c.name,
            Channel::PropertyLink(c) => &c.name,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Link(_) => ChannelKind::Link,
            Channel::BackLink(_) => ChannelKind::BackLink,
            Channel::PropertyLink(_) => ChannelKind::PropertyLink,
        }
    }

    /// Instances on the sending side, in declaration order.
    pub fn sender_instances(&self) -> Vec<&InstanceId> {
        let ids: Vec<&InstanceId> = match self {
            Channel::Link(c) => c.publishers.iter().map(|p| &p.instance).collect(),
            Channel::BackLink(c) => c.requestors.iter().map(|r| &r.instance).collect(),
            Channel::PropertyLink(c) => c.senders.iter().map(|p| &p.instance).collect(),
        };
        dedup(ids)
    }

    /// Instances on the receiving side, in declaration order.
    ///
    /// A BackLink delivers replies to its requestors, but only repliers
    /// count as receivers here: blocking a requestor must not freeze the
    /// request path of its peers. Every PropertyLink participant receives
    /// mirrored changes, whichever wire list named it.
    pub fn receiver_instances(&self) -> Vec<&InstanceId> {
        let ids: Vec<&InstanceId> = match self {
            Channel::Link(c) => c.subscribers.iter().map(|s| &s.instance).collect(),
            Channel::BackLink(c) => c.repliers.iter().map(|r| &r.instance).collect(),
            Channel::PropertyLink(c) => c.participants().into_iter().map(|p| &p.instance).collect(),
        };
        dedup(ids)
    }

    /// Every instance taking part in the channel.
    pub fn instances(&self) -> Vec<&InstanceId> {
        let mut all = self.sender_instances();
        all.extend(self.receiver_instances());
        dedup(all)
    }

    pub fn involves(&self, instance: &InstanceId) -> bool {
        self.instances().contains(&instance)
    }

    /// Check structural rules: a name, roles on both sides, and no role
    /// bound on both sides of a Link or BackLink.
    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        if name.trim().is_empty() {
            return Err(RoamError::malformed_channel(name, "channel name is empty"));
        }

        match self {
            Channel::Link(c) => {
                require_roles(name, c.publishers.len(), c.subscribers.len())?;
                for p in &c.publishers {
                    if c.subscribers
                        .iter()
                        .any(|s| s.instance == p.instance && s.target.operation() == p.event)
                    {
                        return Err(RoamError::malformed_channel(
                            name,
                            format!("{} is both publisher and subscriber of '{}'", p.instance, p.event),
                        ));
                    }
                }
            }
            Channel::BackLink(c) => {
                require_roles(name, c.requestors.len(), c.repliers.len())?;
                for r in &c.requestors {
                    if c.repliers
                        .iter()
                        .any(|p| p.instance == r.instance && p.operation == r.event)
                    {
                        return Err(RoamError::malformed_channel(
                            name,
                            format!("{} is both requestor and replier of '{}'", r.instance, r.event),
                        ));
                    }
                }
            }
            Channel::PropertyLink(c) => {
                require_roles(name, c.senders.len(), c.receivers.len())?;
            }
        }
        Ok(())
    }
}

fn require_roles(name: &str, senders: usize, receivers: usize) -> Result<()> {
    if senders == 0 {
        return Err(RoamError::malformed_channel(name, "channel has no sender roles"));
    }
    if receivers == 0 {
        return Err(RoamError::malformed_channel(name, "channel has no receiver roles"));
    }
    Ok(())
}

fn dedup(ids: Vec<&InstanceId>) -> Vec<&InstanceId> {
    let mut out: Vec<&InstanceId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_link_instances() {
        let channel = Channel::link(
            "A_to_B",
            vec![Publisher::new("a", "changed")],
            vec![Subscriber::operation("b", "refresh"), Subscriber::operation("c", "refresh")],
        )
        .unwrap();

        assert_eq!(channel.kind(), ChannelKind::Link);
        assert_eq!(channel.sender_instances(), vec![&InstanceId::from("a")]);
        assert_eq!(channel.receiver_instances().len(), 2);
        assert!(channel.involves(&InstanceId::from("c")));
    }

    #[test]
    fn test_link_rejects_self_loop() {
        let err = Channel::link(
            "loop",
            vec![Publisher::new("a", "ping")],
            vec![Subscriber::operation("a", "ping")],
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedChannel);
    }

    #[test]
    fn test_same_instance_with_distinct_bindings_is_allowed() {
        assert!(Channel::link(
            "self",
            vec![Publisher::new("a", "ping")],
            vec![Subscriber::operation("a", "pong")],
        )
        .is_ok());
    }

    #[test]
    fn test_empty_side_rejected() {
        let err = Channel::back_link("req", vec![Requestor::new("a", "ask", "answer")], vec![]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedChannel);
    }

    #[test]
    fn test_property_link_participants_are_distinct() {
        let channel = Channel::property_link(
            "zoom-sync",
            vec![Participant::new("m1", "zoom", "setZoom"), Participant::new("m2", "zoom", "setZoom")],
        )
        .unwrap();

        if let Channel::PropertyLink(c) = &channel {
            assert_eq!(c.participants().len(), 2);
        }
        assert_eq!(channel.instances().len(), 2);
    }

    #[test]
    fn test_kind_numbers() {
        assert_eq!(ChannelKind::from_number(1).unwrap(), ChannelKind::BackLink);
        assert_eq!(ChannelKind::PropertyLink.number(), 2);
        assert_eq!(
            ChannelKind::from_number(9).unwrap_err().code(),
            ErrorCode::UnknownChannelType
        );
    }
}
