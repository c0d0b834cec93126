//! Subscriptions and deliveries.

use std::sync::Arc;

use crate::channel::{ChannelKind, ComponentMessage, SubscriberTarget};
use crate::container::InstanceId;

/// Handle of one subscription, unique per broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Which way a message travels through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Publisher to subscriber, or requestor to replier
    Forward,
    /// Replier back to requestor
    Backward,
    /// Participant to every other participant
    Mirror,
}

/// One message handed to one subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: Arc<str>,
    pub kind: ChannelKind,
    pub publisher: InstanceId,
    pub subscriber: InstanceId,
    pub target: SubscriberTarget,
    /// This subscriber's own copy
    pub message: ComponentMessage,
}

pub type DeliveryHandler = Arc<dyn Fn(&Delivery) + Send + Sync>;

/// A handler attached to a channel.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub instance: InstanceId,
    pub target: SubscriberTarget,
    pub route: Route,
    /// Created by wiring rather than by an explicit subscribe call
    pub wired: bool,
    pub handler: DeliveryHandler,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("target", &self.target)
            .field("route", &self.route)
            .field("wired", &self.wired)
            .finish()
    }
}
