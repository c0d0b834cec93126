//! Source-side state capture.
//!
//! While a component runs, the runtime records every input it accepts into
//! an [`InputBacklog`] and acknowledges it once processed. At migration
//! time [`StateCapture`] freezes the component and packs its properties and
//! unacknowledged inputs into a [`MigrationStateObject`].

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use super::event::InputEvent;
use super::state::{MigrationStateObject, PropertyRecord};
use crate::broker::EventBroker;
use crate::container::ComponentContainer;
use crate::telemetry::SensitiveFieldRedactor;

#[derive(Debug, Default)]
struct BacklogState {
    events: Vec<InputEvent>,
    last_timestamp: f64,
}

/// Unconsumed inputs of one component, stamped in arrival order.
#[derive(Debug, Default)]
pub struct InputBacklog {
    state: Mutex<BacklogState>,
}

impl InputBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp and store an event. Stamps are wall-clock milliseconds, bumped
    /// when needed so they strictly increase.
    pub fn record(&self, mut event: InputEvent) -> f64 {
        let mut state = self.state.lock();
        let now = Utc::now().timestamp_millis() as f64;
        let timestamp = if now > state.last_timestamp { now } else { state.last_timestamp + 1.0 };
        state.last_timestamp = timestamp;

        event.set_timestamp(timestamp);
        state.events.push(event);
        timestamp
    }

    /// Drop the event stamped `timestamp` once the component processed it.
    pub fn acknowledge(&self, timestamp: f64) -> bool {
        let mut state = self.state.lock();
        let before = state.events.len();
        state.events.retain(|e| e.timestamp() != timestamp);
        state.events.len() != before
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Take every pending event, oldest first.
    pub fn drain(&self) -> Vec<InputEvent> {
        std::mem::take(&mut self.state.lock().events)
    }
}

/// Captures component state for migration.
pub struct StateCapture {
    broker: Arc<EventBroker>,
}

impl StateCapture {
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self { broker }
    }

    /// Freeze `container` and pack its state.
    ///
    /// Inbound channels are blocked before anything is read, so no message
    /// can change a property between the read and the move.
    #[instrument(skip_all, fields(instance = %container.instance_id()))]
    pub fn capture(&self, container: &dyn ComponentContainer, backlog: &InputBacklog) -> MigrationStateObject {
        let instance = container.instance_id().clone();
        let blocked = self.broker.block_channels_of_subscriber(&instance);
        container.block();

        let redactor = SensitiveFieldRedactor::global();
        let checkpoint: Vec<PropertyRecord> = container
            .property_names()
            .into_iter()
            .filter_map(|name| {
                let value = container.get_property(&name)?;
                debug!(property = %name, value = %redactor.redact_json(&name, &value), "Captured property");
                Some(PropertyRecord::new(name, value))
            })
            .collect();

        let input_events: Vec<serde_json::Value> = backlog.drain().iter().map(InputEvent::to_wire).collect();

        info!(
            properties = checkpoint.len(),
            events = input_events.len(),
            blocked_channels = blocked,
            "Captured component state"
        );

        MigrationStateObject {
            instance_id: instance,
            checkpoint,
            input_events,
        }
    }
}
