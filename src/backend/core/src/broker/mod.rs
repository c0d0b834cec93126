//! Event broker: the channel registry and publish/subscribe dispatch.
//!
//! The broker owns every channel added to this runtime, the publisher index
//! mapping `(instance, event)` to channels, and the subscriptions created
//! when a channel is wired. A channel is wired once every instance it
//! names is resolvable: hosted here with a container, or placed on another
//! device. Until then it is registered but pending.
//!
//! Handlers never run under the registry lock, so a handler may publish.

pub mod relay;
pub mod subscription;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::channel::{Channel, ChannelKind, ComponentMessage, SubscriberTarget};
use crate::config::BrokerConfig;
use crate::container::{ComponentDirectory, InstanceId};
use crate::distribution::DistributionManager;
use crate::error::{Result, RoamError};
use crate::telemetry::BrokerMetrics;

pub use relay::{QueueRelay, RemoteEnvelope, RemoteRelay};
pub use subscription::{Delivery, DeliveryHandler, Route, SubscriptionId};

use subscription::Subscription;

// ═══════════════════════════════════════════════════════════════════════════════
// Registry Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a successful `add_channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    /// Every role resolved; subscriptions are live
    Wired,
    /// Registered, waiting for instances to be instantiated
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PublisherKey {
    instance: InstanceId,
    event: String,
}

impl PublisherKey {
    fn new(instance: &InstanceId, event: &str) -> Self {
        Self {
            instance: instance.clone(),
            event: event.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct PublisherBinding {
    channel: String,
    route: Route,
    seq: u64,
}

struct ChannelEntry {
    channel: Arc<Channel>,
    name: Arc<str>,
    seq: u64,
    wired: bool,
    blocked: bool,
    subscriptions: Vec<Subscription>,
}

type CallbackKey = (String, String);

#[derive(Default)]
struct Registry {
    /// Channel names in registration order
    order: Vec<String>,
    channels: HashMap<String, ChannelEntry>,
    /// Bindings kept sorted by channel registration sequence
    publishers: HashMap<PublisherKey, Vec<PublisherBinding>>,
    /// Requestor that issued each `(channel, callbackId)` request
    callbacks: HashMap<CallbackKey, InstanceId>,
    /// Pending callback keys, oldest first
    callback_order: VecDeque<CallbackKey>,
    next_seq: u64,
}

impl Registry {
    /// Remember who issued a request, forgetting the oldest ones past `limit`.
    fn remember_callback(&mut self, key: CallbackKey, requestor: InstanceId, limit: usize) {
        if self.callbacks.insert(key.clone(), requestor).is_none() {
            self.callback_order.push_back(key);
        }
        while self.callbacks.len() > limit {
            let Some(oldest) = self.callback_order.pop_front() else {
                break;
            };
            if self.callbacks.remove(&oldest).is_some() {
                debug!(channel = %oldest.0, callback = %oldest.1, "Forgot unanswered request");
            }
        }
    }

    fn forget_callback(&mut self, key: &CallbackKey) {
        if self.callbacks.remove(key).is_some() {
            self.callback_order.retain(|k| k != key);
        }
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    suppressed: AtomicU64,
    forwarded: AtomicU64,
    unrouted: AtomicU64,
}

/// What one publish did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    /// Local subscribers invoked
    pub delivered: usize,
    /// Envelopes handed to the relay
    pub forwarded: usize,
    /// Blocked channels skipped
    pub suppressed: usize,
}

/// Point-in-time broker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub channels: usize,
    pub wired: usize,
    pub pending: usize,
    pub blocked: usize,
    pub subscriptions: usize,
    pub published: u64,
    pub delivered: u64,
    pub suppressed: u64,
    pub forwarded: u64,
    pub unrouted: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Broker
// ═══════════════════════════════════════════════════════════════════════════════

pub struct EventBroker {
    directory: Arc<dyn ComponentDirectory>,
    distribution: Arc<dyn DistributionManager>,
    relay: Option<Arc<dyn RemoteRelay>>,
    config: BrokerConfig,
    state: RwLock<Registry>,
    next_subscription: AtomicU64,
    counters: Counters,
}

impl EventBroker {
    pub fn new(directory: Arc<dyn ComponentDirectory>, distribution: Arc<dyn DistributionManager>) -> Self {
        Self {
            directory,
            distribution,
            relay: None,
            config: BrokerConfig::default(),
            state: RwLock::new(Registry::default()),
            next_subscription: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn RemoteRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    // ─── Locality ───────────────────────────────────────────────────────────

    /// Placed on another device.
    fn is_remote(&self, instance: &InstanceId) -> bool {
        self.distribution.is_known(instance) && !self.distribution.is_local(instance)
    }

    /// Has a container here and is not placed elsewhere.
    pub fn is_hosted_here(&self, instance: &InstanceId) -> bool {
        self.directory.lookup(instance).is_some() && !self.is_remote(instance)
    }

    fn is_resolvable(&self, instance: &InstanceId) -> bool {
        self.is_hosted_here(instance) || self.is_remote(instance)
    }

    // ─── Registration ───────────────────────────────────────────────────────

    /// Register a channel and wire it if every role resolves.
    ///
    /// A channel whose name is already registered is rejected and nothing
    /// already registered changes.
    #[instrument(skip(self, channel), fields(channel = %channel.name(), kind = %channel.kind()))]
    pub fn add_channel(&self, channel: Channel) -> Result<AddOutcome> {
        channel.validate()?;
        let name = channel.name().to_string();
        let kind = channel.kind();

        let wired = {
            let mut reg = self.state.write();
            if reg.channels.contains_key(&name) {
                let err = RoamError::duplicate_channel(&name);
                err.log();
                return Err(err);
            }

            let seq = reg.next_seq;
            reg.next_seq += 1;
            reg.order.push(name.clone());
            reg.channels.insert(
                name.clone(),
                ChannelEntry {
                    name: Arc::from(name.as_str()),
                    channel: Arc::new(channel),
                    seq,
                    wired: false,
                    blocked: false,
                    subscriptions: Vec::new(),
                },
            );
            self.try_wire(&mut reg, &name)
        };

        BrokerMetrics::record_channel_added(&kind.to_string(), wired);
        if wired {
            info!("Channel added");
            Ok(AddOutcome::Wired)
        } else {
            info!("Channel added, wiring deferred");
            Ok(AddOutcome::Deferred)
        }
    }

    /// Drop a channel from every index. Unknown names are a no-op.
    #[instrument(skip(self))]
    pub fn remove_channel(&self, name: &str) -> bool {
        let mut reg = self.state.write();
        let reg = &mut *reg;

        let removed = reg.channels.remove(name);
        reg.order.retain(|n| n != name);
        for bindings in reg.publishers.values_mut() {
            bindings.retain(|b| b.channel != name);
        }
        reg.publishers.retain(|_, bindings| !bindings.is_empty());
        reg.callbacks.retain(|(channel, _), _| channel != name);
        reg.callback_order.retain(|(channel, _)| channel != name);

        match removed {
            Some(entry) => {
                info!(subscriptions = entry.subscriptions.len(), "Channel removed");
                true
            }
            None => {
                debug!("Channel not registered, nothing to remove");
                false
            }
        }
    }

    /// Retry wiring for every pending channel. Returns the names wired now.
    pub fn wire_pending(&self) -> Vec<String> {
        let mut reg = self.state.write();
        let pending: Vec<String> = reg
            .order
            .iter()
            .filter(|n| reg.channels.get(*n).map(|e| !e.wired).unwrap_or(false))
            .cloned()
            .collect();

        pending
            .into_iter()
            .filter(|name| self.try_wire(&mut reg, name))
            .collect()
    }

    /// A container for `instance` now exists; complete deferred wiring.
    #[instrument(skip(self, instance), fields(instance = %instance))]
    pub fn notify_component_instantiated(&self, instance: &InstanceId) -> Vec<String> {
        let wired = self.wire_pending();
        if !wired.is_empty() {
            info!(channels = ?wired, "Deferred channels wired");
        }
        wired
    }

    fn try_wire(&self, reg: &mut Registry, name: &str) -> bool {
        let (channel, seq) = match reg.channels.get(name) {
            Some(entry) if entry.wired => return true,
            Some(entry) => (Arc::clone(&entry.channel), entry.seq),
            None => return false,
        };

        let unresolved: Vec<&InstanceId> = channel
            .instances()
            .into_iter()
            .filter(|i| !self.is_resolvable(i))
            .collect();
        if !unresolved.is_empty() {
            debug!(channel = name, unresolved = ?unresolved, "Channel roles not resolvable yet");
            return false;
        }

        let (bindings, subscriptions) = self.plan_wiring(&channel);

        for (key, route) in bindings {
            let list = reg.publishers.entry(key).or_default();
            let at = list.partition_point(|b| b.seq <= seq);
            list.insert(
                at,
                PublisherBinding {
                    channel: name.to_string(),
                    route,
                    seq,
                },
            );
        }

        if let Some(entry) = reg.channels.get_mut(name) {
            entry.subscriptions.extend(subscriptions);
            entry.wired = true;
        }
        debug!(channel = name, "Channel wired");
        true
    }

    fn plan_wiring(&self, channel: &Channel) -> (Vec<(PublisherKey, Route)>, Vec<Subscription>) {
        let mut bindings = Vec::new();
        let mut subscriptions = Vec::new();

        match channel {
            Channel::Link(c) => {
                for p in &c.publishers {
                    bindings.push((PublisherKey::new(&p.instance, &p.event), Route::Forward));
                }
                for s in &c.subscribers {
                    subscriptions.push(self.wired_subscription(&s.instance, s.target.clone(), Route::Forward));
                }
            }
            Channel::BackLink(c) => {
                for r in &c.requestors {
                    bindings.push((PublisherKey::new(&r.instance, &r.event), Route::Forward));
                    subscriptions.push(self.wired_subscription(
                        &r.instance,
                        SubscriberTarget::Operation(r.callback.clone()),
                        Route::Backward,
                    ));
                }
                for r in &c.repliers {
                    subscriptions.push(self.wired_subscription(
                        &r.instance,
                        SubscriberTarget::Operation(r.operation.clone()),
                        Route::Forward,
                    ));
                    bindings.push((PublisherKey::new(&r.instance, &r.return_event), Route::Backward));
                }
            }
            Channel::PropertyLink(c) => {
                for p in c.participants() {
                    bindings.push((PublisherKey::new(&p.instance, &p.property), Route::Mirror));
                    subscriptions.push(self.wired_subscription(
                        &p.instance,
                        SubscriberTarget::Property {
                            operation: p.operation.clone(),
                            property: p.property.clone(),
                        },
                        Route::Mirror,
                    ));
                }
            }
        }

        (bindings, subscriptions)
    }

    /// Subscription that invokes the bound operation on the instance's
    /// container.
    fn wired_subscription(&self, instance: &InstanceId, target: SubscriberTarget, route: Route) -> Subscription {
        let directory = Arc::clone(&self.directory);
        let handler: DeliveryHandler = Arc::new(move |d: &Delivery| match directory.lookup(&d.subscriber) {
            Some(container) => {
                if let Err(e) = container.invoke_operation(d.target.operation(), d.target.property(), &d.message) {
                    warn!(
                        channel = %d.channel,
                        subscriber = %d.subscriber,
                        operation = d.target.operation(),
                        error = %e,
                        "Subscriber operation failed"
                    );
                }
            }
            None => debug!(channel = %d.channel, subscriber = %d.subscriber, "Subscriber container is gone"),
        });

        Subscription {
            id: self.next_subscription_id(),
            instance: instance.clone(),
            target,
            route,
            wired: true,
            handler,
        }
    }

    fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    // ─── Dispatch ───────────────────────────────────────────────────────────

    /// Publish a message from `instance` on every channel bound to the
    /// message's event name.
    ///
    /// Failures are logged and reported as `false`; other channels keep
    /// flowing either way.
    pub fn publish(&self, instance: &InstanceId, message: &ComponentMessage) -> bool {
        match self.try_publish(instance, message) {
            Ok(_) => true,
            Err(e) => {
                if self.config.warn_unrouted {
                    e.log();
                }
                false
            }
        }
    }

    /// Publish and report what happened.
    ///
    /// Each subscriber receives its own copy. A publisher hosted here
    /// reaches local subscribers directly and remote ones through the
    /// relay; a message from a remote publisher reaches local subscribers
    /// only. Channels are visited in registration order.
    #[instrument(skip(self, instance, message), fields(publisher = %instance, event = %message.name()))]
    pub fn try_publish(&self, instance: &InstanceId, message: &ComponentMessage) -> Result<PublishReceipt> {
        let publisher_local = self.is_hosted_here(instance);
        let forward_remote = publisher_local && self.config.remote_forwarding;

        let mut local: Vec<(DeliveryHandler, Delivery)> = Vec::new();
        let mut remote: Vec<(ChannelKind, RemoteEnvelope)> = Vec::new();
        let mut receipt = PublishReceipt::default();

        {
            let mut guard = self.state.write();
            let reg = &mut *guard;

            let key = PublisherKey::new(instance, message.name());
            let bindings = match reg.publishers.get(&key) {
                Some(bindings) if !bindings.is_empty() => bindings.clone(),
                _ => {
                    let registered = reg.publishers.keys().any(|k| &k.instance == instance);
                    self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
                    let err = RoamError::publisher_not_registered(instance.as_str(), message.name());
                    return Err(if registered {
                        err
                    } else {
                        err.with_context("reason", "publisher has no registered channels")
                    });
                }
            };
            self.counters.published.fetch_add(1, Ordering::Relaxed);

            for binding in bindings {
                let Some(entry) = reg.channels.get(&binding.channel) else {
                    continue;
                };
                let kind = entry.channel.kind();

                if entry.blocked {
                    receipt.suppressed += 1;
                    self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                    BrokerMetrics::record_suppressed(&kind.to_string());
                    debug!(channel = %entry.name, "Channel blocked, delivery suppressed");
                    continue;
                }

                let callback_key = message
                    .callback_id()
                    .map(|cb| (binding.channel.clone(), cb.to_string()));
                let reply_to = match (binding.route, &callback_key) {
                    (Route::Backward, Some(key)) => reg.callbacks.get(key).cloned(),
                    _ => None,
                };

                for sub in entry.subscriptions.iter().filter(|s| s.route == binding.route) {
                    if binding.route == Route::Mirror && &sub.instance == instance {
                        continue;
                    }
                    if let Some(requestor) = &reply_to {
                        if &sub.instance != requestor {
                            continue;
                        }
                    }

                    if self.is_hosted_here(&sub.instance) {
                        local.push((
                            Arc::clone(&sub.handler),
                            Delivery {
                                channel: Arc::clone(&entry.name),
                                kind,
                                publisher: instance.clone(),
                                subscriber: sub.instance.clone(),
                                target: sub.target.clone(),
                                message: message.clone(),
                            },
                        ));
                    } else if forward_remote && sub.wired {
                        remote.push((
                            kind,
                            RemoteEnvelope {
                                channel: binding.channel.clone(),
                                from: instance.clone(),
                                to: sub.instance.clone(),
                                target: sub.target.clone(),
                                device: self.distribution.host_of(&sub.instance),
                                message: message.clone(),
                            },
                        ));
                    } else {
                        debug!(channel = %entry.name, subscriber = %sub.instance, "Skipping non-local subscriber");
                    }
                }

                if kind == ChannelKind::BackLink {
                    if let Some(key) = callback_key {
                        match binding.route {
                            Route::Forward => {
                                let limit = self.config.max_pending_callbacks;
                                reg.remember_callback(key, instance.clone(), limit);
                            }
                            Route::Backward if reply_to.is_some() => reg.forget_callback(&key),
                            _ => {}
                        }
                    }
                }
            }
        }

        for (handler, delivery) in &local {
            handler(delivery);
            BrokerMetrics::record_delivered(&delivery.kind.to_string(), 1);
        }
        receipt.delivered = local.len();
        self.counters.delivered.fetch_add(local.len() as u64, Ordering::Relaxed);

        if !remote.is_empty() {
            match &self.relay {
                Some(relay) => {
                    for (kind, envelope) in remote {
                        let to = envelope.to.clone();
                        match relay.forward(envelope) {
                            Ok(()) => {
                                receipt.forwarded += 1;
                                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                                BrokerMetrics::record_forwarded(&kind.to_string(), 1);
                            }
                            Err(e) => warn!(subscriber = %to, error = %e, "Remote forwarding failed"),
                        }
                    }
                }
                None => debug!(count = remote.len(), "No remote relay, remote subscribers skipped"),
            }
        }

        Ok(receipt)
    }

    /// Attach a handler to a channel for `instance`.
    ///
    /// Returns `None` when the channel is not registered yet. That is the
    /// normal case for subscriptions that arrive before their channel; the
    /// caller subscribes again once the channel exists.
    pub fn subscribe(
        &self,
        instance: impl Into<InstanceId>,
        channel: &str,
        target: SubscriberTarget,
        handler: DeliveryHandler,
    ) -> Option<SubscriptionId> {
        let instance = instance.into();
        let mut reg = self.state.write();
        let Some(entry) = reg.channels.get_mut(channel) else {
            debug!(channel, instance = %instance, "Channel not registered, subscription pending");
            return None;
        };

        let route = match entry.channel.as_ref() {
            Channel::Link(_) => Route::Forward,
            Channel::PropertyLink(_) => Route::Mirror,
            Channel::BackLink(c) => {
                if c.requestors
                    .iter()
                    .any(|r| r.instance == instance && r.callback == target.operation())
                {
                    Route::Backward
                } else {
                    Route::Forward
                }
            }
        };

        let id = self.next_subscription_id();
        entry.subscriptions.push(Subscription {
            id,
            instance,
            target,
            route,
            wired: false,
            handler,
        });
        debug!(channel, subscription = %id, "Subscribed");
        Some(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut reg = self.state.write();
        for entry in reg.channels.values_mut() {
            let before = entry.subscriptions.len();
            entry.subscriptions.retain(|s| s.id != id);
            if entry.subscriptions.len() != before {
                return true;
            }
        }
        false
    }

    // ─── Migration Support ──────────────────────────────────────────────────

    /// Block every channel on which `instance` receives. Returns how many
    /// channels reference it.
    #[instrument(skip(self, instance), fields(instance = %instance))]
    pub fn block_channels_of_subscriber(&self, instance: &InstanceId) -> usize {
        let count = self.set_blocked(instance, true);
        info!(channels = count, "Blocked inbound channels");
        count
    }

    #[instrument(skip(self, instance), fields(instance = %instance))]
    pub fn unblock_channels_of_subscriber(&self, instance: &InstanceId) -> usize {
        let count = self.set_blocked(instance, false);
        info!(channels = count, "Unblocked inbound channels");
        count
    }

    fn set_blocked(&self, instance: &InstanceId, blocked: bool) -> usize {
        let mut reg = self.state.write();
        let mut count = 0;
        for entry in reg.channels.values_mut() {
            if entry.channel.receiver_instances().contains(&instance) {
                entry.blocked = blocked;
                count += 1;
            }
        }
        count
    }

    /// Remove every channel involving `instance` whose other roles are all
    /// hosted elsewhere. Used after `instance` migrated away.
    #[instrument(skip(self, instance), fields(instance = %instance))]
    pub fn remove_channels_from_component(&self, instance: &InstanceId) -> Vec<String> {
        let stale: Vec<String> = {
            let reg = self.state.read();
            reg.order
                .iter()
                .filter(|name| {
                    reg.channels.get(*name).is_some_and(|entry| {
                        entry.channel.involves(instance)
                            && entry
                                .channel
                                .instances()
                                .into_iter()
                                .filter(|i| *i != instance)
                                .all(|i| !self.is_hosted_here(i))
                    })
                })
                .cloned()
                .collect()
        };

        for name in &stale {
            self.remove_channel(name);
        }
        if !stale.is_empty() {
            info!(channels = ?stale, "Removed remote-only channels");
        }
        stale
    }

    // ─── Introspection ──────────────────────────────────────────────────────

    /// Channel names in registration order.
    pub fn channel_names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.state.read().channels.get(name).map(|e| Arc::clone(&e.channel))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().channels.contains_key(name)
    }

    pub fn is_blocked(&self, name: &str) -> Option<bool> {
        self.state.read().channels.get(name).map(|e| e.blocked)
    }

    pub fn is_wired(&self, name: &str) -> Option<bool> {
        self.state.read().channels.get(name).map(|e| e.wired)
    }

    /// Whether every role of the channel is hosted here.
    pub fn is_local(&self, name: &str) -> Option<bool> {
        let channel = self.channel(name)?;
        let local = channel.instances().into_iter().all(|i| self.is_hosted_here(i));
        Some(local)
    }

    /// Fail unless the channel is registered and wired.
    pub fn ensure_wired(&self, name: &str) -> Result<()> {
        let channel = {
            let reg = self.state.read();
            match reg.channels.get(name) {
                None => return Err(RoamError::channel_not_found(name)),
                Some(entry) if entry.wired => return Ok(()),
                Some(entry) => Arc::clone(&entry.channel),
            }
        };

        let unresolved: Vec<String> = channel
            .instances()
            .into_iter()
            .filter(|i| !self.is_resolvable(i))
            .map(|i| i.to_string())
            .collect();
        Err(RoamError::unresolved_wiring(name, &unresolved))
    }

    /// Registered channels still waiting for wiring.
    pub fn pending_channels(&self) -> Vec<String> {
        let reg = self.state.read();
        reg.order
            .iter()
            .filter(|n| reg.channels.get(*n).is_some_and(|e| !e.wired))
            .cloned()
            .collect()
    }

    /// Channels naming `instance` in any role.
    pub fn channels_of(&self, instance: &InstanceId) -> Vec<String> {
        let reg = self.state.read();
        reg.order
            .iter()
            .filter(|n| reg.channels.get(*n).is_some_and(|e| e.channel.involves(instance)))
            .cloned()
            .collect()
    }

    /// BackLink requests still waiting for their reply.
    pub fn pending_callbacks(&self) -> usize {
        self.state.read().callbacks.len()
    }

    pub fn subscription_count(&self, name: &str) -> Option<usize> {
        self.state.read().channels.get(name).map(|e| e.subscriptions.len())
    }

    pub fn stats(&self) -> BrokerStats {
        let reg = self.state.read();
        let entries = reg.channels.values();
        let (mut wired, mut blocked, mut subscriptions) = (0, 0, 0);
        for entry in entries {
            wired += usize::from(entry.wired);
            blocked += usize::from(entry.blocked);
            subscriptions += entry.subscriptions.len();
        }

        BrokerStats {
            channels: reg.channels.len(),
            wired,
            pending: reg.channels.len() - wired,
            blocked,
            subscriptions,
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            unrouted: self.counters.unrouted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker")
            .field("channels", &self.channel_names())
            .field("relay", &self.relay.is_some())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Participant, PropertyLinkChannel, Publisher, Replier, Requestor, Subscriber};
    use crate::container::{ComponentContainer, ContainerRegistry, InMemoryContainer};
    use crate::distribution::StaticDistribution;
    use crate::error::ErrorCode;
    use serde_json::json;

    struct Fixture {
        registry: Arc<ContainerRegistry>,
        distribution: Arc<StaticDistribution>,
        containers: HashMap<String, Arc<InMemoryContainer>>,
    }

    impl Fixture {
        fn new(local: &[&str]) -> Self {
            let registry = Arc::new(ContainerRegistry::new());
            let distribution = Arc::new(StaticDistribution::new("here"));
            let mut containers = HashMap::new();
            for id in local {
                let container = Arc::new(InMemoryContainer::new(*id));
                registry.insert(container.clone());
                distribution.place(*id, "here");
                containers.insert(id.to_string(), container);
            }
            Self {
                registry,
                distribution,
                containers,
            }
        }

        fn broker(&self) -> EventBroker {
            EventBroker::new(self.registry.clone(), self.distribution.clone())
        }

        fn invocations(&self, id: &str) -> Vec<String> {
            self.containers[id]
                .invocations()
                .into_iter()
                .map(|i| i.operation)
                .collect()
        }
    }

    fn link(name: &str, from: &str, to: &str) -> Channel {
        Channel::link(name, vec![Publisher::new(from, "changed")], vec![Subscriber::operation(to, "refresh")]).unwrap()
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let fx = Fixture::new(&["a", "b"]);
        let broker = fx.broker();

        assert_eq!(broker.add_channel(link("A_to_B", "a", "b")).unwrap(), AddOutcome::Wired);
        let err = broker.add_channel(link("A_to_B", "a", "b")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateChannel);
        assert_eq!(broker.subscription_count("A_to_B"), Some(1));

        broker.publish(&"a".into(), &ComponentMessage::new("changed", json!(1)));
        assert_eq!(fx.invocations("b"), vec!["refresh"]);
    }

    #[test]
    fn test_deferred_until_instantiated() {
        let fx = Fixture::new(&["a"]);
        let broker = fx.broker();

        assert_eq!(broker.add_channel(link("A_to_B", "a", "b")).unwrap(), AddOutcome::Deferred);
        assert!(!broker.publish(&"a".into(), &ComponentMessage::new("changed", json!(1))));
        assert_eq!(broker.pending_channels(), vec!["A_to_B".to_string()]);

        let b = Arc::new(InMemoryContainer::new("b"));
        fx.registry.insert(b.clone());
        assert_eq!(broker.notify_component_instantiated(&"b".into()), vec!["A_to_B".to_string()]);

        assert!(broker.publish(&"a".into(), &ComponentMessage::new("changed", json!(2))));
        assert_eq!(b.invocations().len(), 1);
    }

    #[test]
    fn test_remote_peer_is_resolvable() {
        let fx = Fixture::new(&["a"]);
        fx.distribution.place("b", "phone");
        let broker = fx.broker();

        assert_eq!(broker.add_channel(link("A_to_B", "a", "b")).unwrap(), AddOutcome::Wired);
        assert_eq!(broker.is_local("A_to_B"), Some(false));
    }

    #[test]
    fn test_back_link_routes_reply_to_requestor() {
        let fx = Fixture::new(&["s1", "s2", "geo"]);
        let broker = fx.broker();
        broker
            .add_channel(
                Channel::back_link(
                    "lookup",
                    vec![Requestor::new("s1", "ask", "answer"), Requestor::new("s2", "ask", "answer")],
                    vec![Replier::new("geo", "geocode", "geocoded")],
                )
                .unwrap(),
            )
            .unwrap();

        broker.publish(&"s2".into(), &ComponentMessage::new("ask", json!("paris")).with_callback_id("cb-9"));
        assert_eq!(fx.invocations("geo"), vec!["geocode"]);

        broker.publish(&"geo".into(), &ComponentMessage::new("geocoded", json!([2.35, 48.85])).with_callback_id("cb-9"));
        assert_eq!(fx.invocations("s2"), vec!["answer"]);
        assert!(fx.invocations("s1").is_empty());

        broker.publish(&"geo".into(), &ComponentMessage::new("geocoded", json!(null)));
        assert_eq!(fx.invocations("s1"), vec!["answer"]);
        assert_eq!(fx.invocations("s2").len(), 2);
    }

    #[test]
    fn test_back_link_forgets_callback_once_answered() {
        let fx = Fixture::new(&["s1", "geo"]);
        let broker = fx.broker();
        broker
            .add_channel(
                Channel::back_link(
                    "lookup",
                    vec![Requestor::new("s1", "ask", "answer")],
                    vec![Replier::new("geo", "geocode", "geocoded")],
                )
                .unwrap(),
            )
            .unwrap();

        for cb in ["cb-1", "cb-2", "cb-3"] {
            broker.publish(&"s1".into(), &ComponentMessage::new("ask", json!(cb)).with_callback_id(cb));
        }
        assert_eq!(broker.pending_callbacks(), 3);

        broker.publish(&"geo".into(), &ComponentMessage::new("geocoded", json!(1)).with_callback_id("cb-2"));
        assert_eq!(fx.invocations("s1"), vec!["answer"]);
        assert_eq!(broker.pending_callbacks(), 2);

        // Unknown ids do not touch the pending set.
        broker.publish(&"geo".into(), &ComponentMessage::new("geocoded", json!(2)).with_callback_id("cb-2"));
        assert_eq!(broker.pending_callbacks(), 2);

        broker.remove_channel("lookup");
        assert_eq!(broker.pending_callbacks(), 0);
    }

    #[test]
    fn test_unanswered_callbacks_are_bounded() {
        let fx = Fixture::new(&["s1", "s2", "geo"]);
        let broker = fx.broker().with_config(BrokerConfig {
            max_pending_callbacks: 2,
            ..BrokerConfig::default()
        });
        broker
            .add_channel(
                Channel::back_link(
                    "lookup",
                    vec![Requestor::new("s1", "ask", "answer"), Requestor::new("s2", "ask", "answer")],
                    vec![Replier::new("geo", "geocode", "geocoded")],
                )
                .unwrap(),
            )
            .unwrap();

        broker.publish(&"s1".into(), &ComponentMessage::new("ask", json!(1)).with_callback_id("old"));
        broker.publish(&"s2".into(), &ComponentMessage::new("ask", json!(2)).with_callback_id("mid"));
        broker.publish(&"s2".into(), &ComponentMessage::new("ask", json!(3)).with_callback_id("new"));
        assert_eq!(broker.pending_callbacks(), 2);

        // The evicted request no longer has a known requestor, so its reply fans out.
        broker.publish(&"geo".into(), &ComponentMessage::new("geocoded", json!(null)).with_callback_id("old"));
        assert_eq!(fx.invocations("s1"), vec!["answer"]);
        assert_eq!(fx.invocations("s2"), vec!["answer"]);

        broker.publish(&"geo".into(), &ComponentMessage::new("geocoded", json!(null)).with_callback_id("mid"));
        assert_eq!(fx.invocations("s1").len(), 1);
        assert_eq!(fx.invocations("s2").len(), 2);
        assert_eq!(broker.pending_callbacks(), 1);
    }

    #[test]
    fn test_blocking_sender_only_property_participant() {
        let fx = Fixture::new(&["m1", "m2"]);
        let broker = fx.broker();
        broker
            .add_channel(Channel::PropertyLink(PropertyLinkChannel {
                name: "zoom".into(),
                senders: vec![Participant::new("m1", "zoom", "setZoom")],
                receivers: vec![Participant::new("m2", "zoom", "setZoom")],
            }))
            .unwrap();

        assert_eq!(broker.block_channels_of_subscriber(&"m1".into()), 1);
        assert_eq!(broker.is_blocked("zoom"), Some(true));
        broker.publish(&"m2".into(), &ComponentMessage::new("zoom", json!(4)));
        assert!(fx.invocations("m1").is_empty());

        assert_eq!(broker.unblock_channels_of_subscriber(&"m1".into()), 1);
        broker.publish(&"m2".into(), &ComponentMessage::new("zoom", json!(5)));
        assert_eq!(fx.invocations("m1"), vec!["setZoom"]);
        assert_eq!(fx.containers["m1"].get_property("zoom"), Some(json!(5)));
    }

    #[test]
    fn test_property_link_does_not_echo() {
        let fx = Fixture::new(&["m1", "m2"]);
        let broker = fx.broker();
        broker
            .add_channel(
                Channel::property_link(
                    "zoom",
                    vec![Participant::new("m1", "zoom", "setZoom"), Participant::new("m2", "zoom", "setZoom")],
                )
                .unwrap(),
            )
            .unwrap();

        broker.publish(&"m1".into(), &ComponentMessage::new("zoom", json!(7)));

        assert!(fx.invocations("m1").is_empty());
        assert_eq!(fx.invocations("m2"), vec!["setZoom"]);
        assert_eq!(fx.containers["m2"].get_property("zoom"), Some(json!(7)));
    }

    #[test]
    fn test_subscribe_on_missing_channel_is_pending() {
        let fx = Fixture::new(&["a", "b"]);
        let broker = fx.broker();

        let handler: DeliveryHandler = Arc::new(|_| {});
        assert!(broker
            .subscribe("b", "later", SubscriberTarget::Operation("refresh".into()), handler.clone())
            .is_none());

        broker.add_channel(link("later", "a", "b")).unwrap();
        assert!(broker
            .subscribe("b", "later", SubscriberTarget::Operation("refresh".into()), handler)
            .is_some());
    }

    #[test]
    fn test_remove_channel_is_idempotent() {
        let fx = Fixture::new(&["a", "b"]);
        let broker = fx.broker();
        broker.add_channel(link("A_to_B", "a", "b")).unwrap();

        assert!(broker.remove_channel("A_to_B"));
        assert!(!broker.remove_channel("A_to_B"));
        assert!(!broker.publish(&"a".into(), &ComponentMessage::new("changed", json!(1))));
    }

    #[test]
    fn test_forwarding_to_remote_subscriber() {
        let fx = Fixture::new(&["a"]);
        fx.distribution.place("b", "phone");
        let (relay, mut rx) = QueueRelay::new();
        let broker = fx.broker().with_relay(Arc::new(relay));
        broker.add_channel(link("A_to_B", "a", "b")).unwrap();

        broker.publish(&"a".into(), &ComponentMessage::new("changed", json!(1)));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.to, InstanceId::from("b"));
        assert_eq!(envelope.device.map(|d| d.0), Some("phone".to_string()));
        assert_eq!(broker.stats().forwarded, 1);
    }

    #[test]
    fn test_stats() {
        let fx = Fixture::new(&["a", "b"]);
        let broker = fx.broker();
        broker.add_channel(link("A_to_B", "a", "b")).unwrap();
        broker.add_channel(link("A_to_C", "a", "c")).unwrap();
        broker.block_channels_of_subscriber(&"b".into());

        let stats = broker.stats();
        assert_eq!(stats.channels, 2);
        assert_eq!(stats.wired, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.blocked, 1);
    }
}
