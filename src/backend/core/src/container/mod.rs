//! Component containers and the directory that finds them.
//!
//! A container hosts one component instance. The runtime that renders and
//! executes components lives outside this crate; it plugs in through
//! [`ComponentContainer`] and the three replay proxies. The broker reaches
//! containers through a [`ComponentDirectory`] when it wires subscribers,
//! and the injector does the same when it restores state.

pub mod memory;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::channel::ComponentMessage;
use crate::error::Result;
use crate::migration::event::{CallEvent, RuntimeEvent, ServiceResponseEvent};

pub use memory::{Confirmation, InMemoryContainer, Invocation, PropertyWrite};

/// Identifier of a component instance, unique within one application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a hosted component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created, not yet started
    Instantiated,
    /// Executing normally
    Running,
    /// Internals are being restored from a migration checkpoint; no
    /// externally visible side effects may be emitted
    StateRecovery,
    /// Frozen by the runtime (inbound and outbound gated)
    Blocked,
    /// Torn down
    Removed,
}

impl LifecycleState {
    pub fn is_recovering(&self) -> bool {
        matches!(self, LifecycleState::StateRecovery)
    }
}

/// Notification that a property of a container changed.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub instance_id: InstanceId,
    pub property: String,
    pub value: serde_json::Value,
}

/// Handle returned when registering a property observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Callback invoked for every property change.
pub type PropertyObserver = Arc<dyn Fn(&PropertyChange) + Send + Sync>;

/// Accepts replayed application (call) events.
pub trait ApplicationEventProxy: Send + Sync {
    fn replay_call(&self, event: &CallEvent) -> Result<()>;
}

/// Accepts replayed service responses.
pub trait ServiceEventProxy: Send + Sync {
    fn replay_response(&self, event: &ServiceResponseEvent) -> Result<()>;
}

/// Accepts replayed timer and interval events.
pub trait RuntimeEventProxy: Send + Sync {
    fn replay_timer(&self, event: &RuntimeEvent) -> Result<()>;
}

/// Runtime host object for one component instance.
///
/// Property writes may confirm asynchronously: an implementation is free
/// to notify observers from a later task. Callers that need confirmation
/// must observe rather than assume.
pub trait ComponentContainer: Send + Sync {
    fn instance_id(&self) -> &InstanceId;

    /// Names of the properties the component declares.
    fn property_names(&self) -> Vec<String>;

    fn get_property(&self, name: &str) -> Option<serde_json::Value>;

    fn set_property(&self, name: &str, value: serde_json::Value) -> Result<()>;

    /// Gate outbound propagation. Idempotent.
    fn block(&self);

    fn unblock(&self);

    fn is_blocked(&self) -> bool;

    fn lifecycle(&self) -> LifecycleState;

    fn set_lifecycle(&self, state: LifecycleState);

    fn observe_properties(&self, observer: PropertyObserver) -> ObserverId;

    fn remove_observer(&self, id: ObserverId) -> bool;

    /// Number of observers currently registered.
    fn observer_count(&self) -> usize;

    /// Run an operation with a delivered message. `property` is set when the
    /// subscription binds an `{operation, property}` pair.
    fn invoke_operation(&self, operation: &str, property: Option<&str>, message: &ComponentMessage) -> Result<()>;

    fn application_events(&self) -> &dyn ApplicationEventProxy;

    fn service_events(&self) -> &dyn ServiceEventProxy;

    fn runtime_events(&self) -> &dyn RuntimeEventProxy;
}

/// Finds the container hosting an instance in this runtime.
pub trait ComponentDirectory: Send + Sync {
    fn lookup(&self, instance_id: &InstanceId) -> Option<Arc<dyn ComponentContainer>>;
}

/// Concurrent registry of the containers instantiated in this runtime.
#[derive(Default)]
pub struct ContainerRegistry {
    containers: DashMap<InstanceId, Arc<dyn ComponentContainer>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container, replacing any previous one for the instance.
    pub fn insert(&self, container: Arc<dyn ComponentContainer>) {
        self.containers.insert(container.instance_id().clone(), container);
    }

    pub fn remove(&self, instance_id: &InstanceId) -> Option<Arc<dyn ComponentContainer>> {
        self.containers.remove(instance_id).map(|(_, c)| c)
    }

    pub fn contains(&self, instance_id: &InstanceId) -> bool {
        self.containers.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.containers.iter().map(|e| e.key().clone()).collect()
    }
}

impl ComponentDirectory for ContainerRegistry {
    fn lookup(&self, instance_id: &InstanceId) -> Option<Arc<dyn ComponentContainer>> {
        self.containers.get(instance_id).map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ContainerRegistry::new();
        registry.insert(Arc::new(InMemoryContainer::new("map-1")));

        assert!(registry.lookup(&InstanceId::from("map-1")).is_some());
        assert!(registry.lookup(&InstanceId::from("map-2")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_remove() {
        let registry = ContainerRegistry::new();
        registry.insert(Arc::new(InMemoryContainer::new("list-1")));

        assert!(registry.remove(&InstanceId::from("list-1")).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_instance_id_is_transparent_on_the_wire() {
        let id = InstanceId::from("weather-3");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"weather-3\"");
    }
}
