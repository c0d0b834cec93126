//! In-process container used by tests, benchmarks and the simulator.
//!
//! It keeps properties in memory, records every invocation and replayed
//! event, and can confirm property writes immediately, from a spawned task,
//! or never (to exercise checkpoint timeouts).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{
    ApplicationEventProxy, ComponentContainer, InstanceId, LifecycleState, ObserverId, PropertyChange,
    PropertyObserver, RuntimeEventProxy, ServiceEventProxy,
};
use crate::channel::ComponentMessage;
use crate::error::{Result, RoamError};
use crate::migration::event::{CallEvent, InputEvent, RuntimeEvent, ServiceResponseEvent};

/// How property writes are confirmed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confirmation {
    /// Observers run inside `set_property`
    #[default]
    Immediate,
    /// Observers run from a spawned tokio task
    Deferred,
    /// Observers are never told
    Never,
}

/// A property write as seen by the container.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyWrite {
    pub property: String,
    pub value: Value,
    /// Whether the container was blocked when the write landed
    pub blocked: bool,
    pub lifecycle: LifecycleState,
}

/// An operation invocation delivered by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub operation: String,
    pub property: Option<String>,
    pub message: ComponentMessage,
}

type ObserverMap = HashMap<ObserverId, PropertyObserver>;

pub struct InMemoryContainer {
    instance_id: InstanceId,
    properties: RwLock<BTreeMap<String, Value>>,
    blocked: AtomicBool,
    lifecycle: Mutex<LifecycleState>,
    confirmation: Confirmation,
    rejected: Vec<String>,
    observers: Arc<RwLock<ObserverMap>>,
    next_observer: AtomicU64,
    writes: Mutex<Vec<PropertyWrite>>,
    invocations: Mutex<Vec<Invocation>>,
    replayed: Mutex<Vec<InputEvent>>,
}

impl InMemoryContainer {
    pub fn new(instance_id: impl Into<InstanceId>) -> Self {
        Self {
            instance_id: instance_id.into(),
            properties: RwLock::new(BTreeMap::new()),
            blocked: AtomicBool::new(false),
            lifecycle: Mutex::new(LifecycleState::Running),
            confirmation: Confirmation::Immediate,
            rejected: Vec::new(),
            observers: Arc::new(RwLock::new(HashMap::new())),
            next_observer: AtomicU64::new(1),
            writes: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
            replayed: Mutex::new(Vec::new()),
        }
    }

    /// Declare a property with its initial value.
    pub fn with_property(self, name: impl Into<String>, value: Value) -> Self {
        self.properties.write().insert(name.into(), value);
        self
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Make writes to `name` fail.
    pub fn with_rejected_property(mut self, name: impl Into<String>) -> Self {
        self.rejected.push(name.into());
        self
    }

    pub fn with_lifecycle(self, state: LifecycleState) -> Self {
        *self.lifecycle.lock() = state;
        self
    }

    pub fn writes(&self) -> Vec<PropertyWrite> {
        self.writes.lock().clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Events replayed through any of the three proxies, in arrival order.
    pub fn replayed(&self) -> Vec<InputEvent> {
        self.replayed.lock().clone()
    }

    /// Snapshot of all property values.
    pub fn properties(&self) -> BTreeMap<String, Value> {
        self.properties.read().clone()
    }

    fn notify(&self, change: PropertyChange) {
        match self.confirmation {
            Confirmation::Never => {}
            Confirmation::Immediate => notify_observers(&self.observers, &change),
            Confirmation::Deferred => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let observers = Arc::clone(&self.observers);
                    handle.spawn(async move {
                        tokio::task::yield_now().await;
                        notify_observers(&observers, &change);
                    });
                }
                Err(_) => notify_observers(&self.observers, &change),
            },
        }
    }
}

fn notify_observers(observers: &RwLock<ObserverMap>, change: &PropertyChange) {
    // Observers may deregister themselves; never call them under the lock.
    let current: Vec<PropertyObserver> = observers.read().values().cloned().collect();
    for observer in current {
        observer(change);
    }
}

impl ComponentContainer for InMemoryContainer {
    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        self.properties.read().get(name).cloned()
    }

    fn set_property(&self, name: &str, value: Value) -> Result<()> {
        if self.rejected.iter().any(|p| p == name) {
            return Err(RoamError::property_write_failed(
                self.instance_id.as_str(),
                name,
                "property is read-only",
            ));
        }

        self.properties.write().insert(name.to_string(), value.clone());
        self.writes.lock().push(PropertyWrite {
            property: name.to_string(),
            value: value.clone(),
            blocked: self.is_blocked(),
            lifecycle: self.lifecycle(),
        });

        self.notify(PropertyChange {
            instance_id: self.instance_id.clone(),
            property: name.to_string(),
            value,
        });
        Ok(())
    }

    fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    fn unblock(&self) {
        self.blocked.store(false, Ordering::SeqCst);
    }

    fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        *self.lifecycle.lock() = state;
    }

    fn observe_properties(&self, observer: PropertyObserver) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().insert(id, observer);
        id
    }

    fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.write().remove(&id).is_some()
    }

    fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    fn invoke_operation(&self, operation: &str, property: Option<&str>, message: &ComponentMessage) -> Result<()> {
        self.invocations.lock().push(Invocation {
            operation: operation.to_string(),
            property: property.map(str::to_string),
            message: message.clone(),
        });
        if let Some(property) = property {
            self.set_property(property, message.body.clone())?;
        }
        Ok(())
    }

    fn application_events(&self) -> &dyn ApplicationEventProxy {
        self
    }

    fn service_events(&self) -> &dyn ServiceEventProxy {
        self
    }

    fn runtime_events(&self) -> &dyn RuntimeEventProxy {
        self
    }
}

impl ApplicationEventProxy for InMemoryContainer {
    fn replay_call(&self, event: &CallEvent) -> Result<()> {
        self.replayed.lock().push(InputEvent::Call(event.clone()));
        Ok(())
    }
}

impl ServiceEventProxy for InMemoryContainer {
    fn replay_response(&self, event: &ServiceResponseEvent) -> Result<()> {
        self.replayed.lock().push(InputEvent::ServiceResponse(event.clone()));
        Ok(())
    }
}

impl RuntimeEventProxy for InMemoryContainer {
    fn replay_timer(&self, event: &RuntimeEvent) -> Result<()> {
        self.replayed.lock().push(InputEvent::Runtime(event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_property_notifies_observer() {
        let container = InMemoryContainer::new("map-1").with_property("zoom", json!(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        container.observe_properties(Arc::new(move |c: &PropertyChange| sink.lock().push(c.property.clone())));

        container.set_property("zoom", json!(4)).unwrap();

        assert_eq!(*seen.lock(), vec!["zoom".to_string()]);
        assert_eq!(container.get_property("zoom"), Some(json!(4)));
    }

    #[test]
    fn test_never_confirmation_stays_silent() {
        let container = InMemoryContainer::new("map-1").with_confirmation(Confirmation::Never);
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        container.observe_properties(Arc::new(move |_: &PropertyChange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        container.set_property("zoom", json!(2)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejected_property() {
        let container = InMemoryContainer::new("map-1").with_rejected_property("center");
        let err = container.set_property("center", json!([0, 0])).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::PropertyWriteFailed);
        assert!(container.writes().is_empty());
    }

    #[test]
    fn test_write_records_block_state() {
        let container = InMemoryContainer::new("map-1");
        container.block();
        container.set_property("zoom", json!(3)).unwrap();

        let writes = container.writes();
        assert!(writes[0].blocked);
    }

    #[test]
    fn test_observer_removal() {
        let container = InMemoryContainer::new("map-1");
        let id = container.observe_properties(Arc::new(|_: &PropertyChange| {}));
        assert_eq!(container.observer_count(), 1);
        assert!(container.remove_observer(id));
        assert!(!container.remove_observer(id));
        assert_eq!(container.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_deferred_confirmation_runs_later() {
        let container = InMemoryContainer::new("map-1").with_confirmation(Confirmation::Deferred);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        container.observe_properties(Arc::new(move |c: &PropertyChange| {
            let _ = tx.send(c.property.clone());
        }));

        container.set_property("zoom", json!(5)).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("zoom"));
    }
}
