//! Target-side state injection.
//!
//! For each state object, in the order given:
//!
//! 1. the container enters `StateRecovery`;
//! 2. every checkpointed property is written with the container re-blocked
//!    before each write, then the injector waits until the container
//!    confirmed a change of every listed property;
//! 3. input events are replayed in timestamp order through the proxy that
//!    matches their class.
//!
//! Every container is resolved and every backlog decoded before the first
//! write, so lookup and validation failures leave all components untouched.
//! A failure after that aborts the whole call.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::event::{InputEvent, RuntimeEvent};
use super::state::{MigrationStateObject, PropertyRecord, ReplayPlan};
use crate::config::MigrationConfig;
use crate::container::{ComponentContainer, ComponentDirectory, LifecycleState, PropertyChange};
use crate::error::{Result, RoamError};
use crate::telemetry::metrics::INJECTION_DURATION;
use crate::telemetry::{MigrationMetrics, OperationTimer, SensitiveFieldRedactor};

// ═══════════════════════════════════════════════════════════════════════════════
// Phases
// ═══════════════════════════════════════════════════════════════════════════════

/// Injection progress of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPhase {
    Pending,
    CheckpointInProgress,
    CheckpointComplete,
    ReplayInProgress,
    Done,
    Failed,
}

impl InjectionPhase {
    pub fn can_transition_to(&self, target: &InjectionPhase) -> bool {
        use InjectionPhase::*;
        matches!(
            (self, target),
            (Pending, CheckpointInProgress)
                | (CheckpointInProgress, CheckpointComplete)
                | (CheckpointComplete, ReplayInProgress)
                | (ReplayInProgress, Done)
                | (Pending, Failed)
                | (CheckpointInProgress, Failed)
                | (CheckpointComplete, Failed)
                | (ReplayInProgress, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InjectionPhase::Done | InjectionPhase::Failed)
    }
}

/// Outcome of injecting one component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InjectionReport {
    pub instance_id: String,
    pub phase: InjectionPhase,
    pub properties_restored: usize,
    pub calls_replayed: usize,
    pub responses_replayed: usize,
    pub timers_replayed: usize,
}

impl InjectionReport {
    fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            phase: InjectionPhase::Pending,
            properties_restored: 0,
            calls_replayed: 0,
            responses_replayed: 0,
            timers_replayed: 0,
        }
    }

    pub fn events_replayed(&self) -> usize {
        self.calls_replayed + self.responses_replayed + self.timers_replayed
    }

    fn advance(&mut self, next: InjectionPhase) -> Result<()> {
        if !self.phase.can_transition_to(&next) {
            return Err(RoamError::invalid_state_transition(self.phase, next));
        }
        debug!(instance = %self.instance_id, from = ?self.phase, to = ?next, "Injection phase");
        self.phase = next;
        Ok(())
    }

    fn count(&mut self, event: &InputEvent) {
        match event {
            InputEvent::Call(_) => self.calls_replayed += 1,
            InputEvent::ServiceResponse(_) => self.responses_replayed += 1,
            InputEvent::Runtime(_) => self.timers_replayed += 1,
        }
    }
}

/// Receives per-component results of an injection.
pub trait InjectionListener: Send {
    fn on_component_restored(&mut self, _state: &MigrationStateObject, _report: &InjectionReport) {}

    fn on_failure(&mut self, _error: &RoamError) {}
}

impl InjectionListener for () {}

// ═══════════════════════════════════════════════════════════════════════════════
// Injector
// ═══════════════════════════════════════════════════════════════════════════════

pub struct StateInjector {
    directory: Arc<dyn ComponentDirectory>,
    config: MigrationConfig,
}

impl StateInjector {
    pub fn new(directory: Arc<dyn ComponentDirectory>) -> Self {
        Self {
            directory,
            config: MigrationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Restore every state object into its container.
    ///
    /// Components are processed one after another in the given order. The
    /// listener hears about each restored component; on error it hears the
    /// error once and no later component is touched.
    #[instrument(skip_all, fields(components = states.len()))]
    pub async fn inject_state<L: InjectionListener>(
        &self,
        states: &[MigrationStateObject],
        listener: &mut L,
    ) -> Result<Vec<InjectionReport>> {
        let timer = OperationTimer::start(INJECTION_DURATION);
        let result = self.run(states, listener).await;
        let elapsed = timer.finish();

        match &result {
            Ok(reports) => {
                MigrationMetrics::record_injection(true);
                info!(
                    components = reports.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "State injection complete"
                );
            }
            Err(e) => {
                MigrationMetrics::record_injection(false);
                e.log();
                listener.on_failure(e);
            }
        }
        result
    }

    async fn run<L: InjectionListener>(
        &self,
        states: &[MigrationStateObject],
        listener: &mut L,
    ) -> Result<Vec<InjectionReport>> {
        let mut prepared = Vec::with_capacity(states.len());
        for state in states {
            let container = self
                .directory
                .lookup(&state.instance_id)
                .ok_or_else(|| RoamError::container_not_found(state.instance_id.as_str()))?;
            let plan = state.replay_plan(&self.config)?;
            prepared.push((state, container, plan));
        }

        let mut reports = Vec::with_capacity(prepared.len());
        for (state, container, plan) in prepared {
            let mut report = InjectionReport::new(plan.instance_id.as_str());
            match self.inject_one(container.as_ref(), &plan, &mut report).await {
                Ok(()) => {
                    listener.on_component_restored(state, &report);
                    reports.push(report);
                }
                Err(e) => {
                    let _ = report.advance(InjectionPhase::Failed);
                    error!(
                        instance = %plan.instance_id,
                        code = %e.code(),
                        restored = report.properties_restored,
                        replayed = report.events_replayed(),
                        "State injection aborted"
                    );
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }

    async fn inject_one(
        &self,
        container: &dyn ComponentContainer,
        plan: &ReplayPlan,
        report: &mut InjectionReport,
    ) -> Result<()> {
        container.set_lifecycle(LifecycleState::StateRecovery);

        report.advance(InjectionPhase::CheckpointInProgress)?;
        report.properties_restored = self.restore_checkpoint(container, &plan.checkpoint).await?;
        report.advance(InjectionPhase::CheckpointComplete)?;

        report.advance(InjectionPhase::ReplayInProgress)?;
        for event in &plan.events {
            dispatch(container, event)?;
            report.count(event);
        }
        report.advance(InjectionPhase::Done)?;

        container.set_lifecycle(LifecycleState::Running);
        container.unblock();
        info!(
            instance = %plan.instance_id,
            properties = report.properties_restored,
            events = report.events_replayed(),
            "Component state restored"
        );
        Ok(())
    }

    /// Write every property and wait until each one has been confirmed.
    ///
    /// The observer is removed on every exit path.
    async fn restore_checkpoint(&self, container: &dyn ComponentContainer, records: &[PropertyRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let observer = container.observe_properties(Arc::new(move |change: &PropertyChange| {
            let _ = tx.send(change.property.clone());
        }));

        let result = self.write_and_confirm(container, records, &mut rx).await;

        if !container.remove_observer(observer) {
            warn!(instance = %container.instance_id(), "Checkpoint observer was already removed");
        }
        result
    }

    async fn write_and_confirm(
        &self,
        container: &dyn ComponentContainer,
        records: &[PropertyRecord],
        rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<usize> {
        let instance = container.instance_id();
        let redactor = SensitiveFieldRedactor::global();
        let mut pending: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();

        for record in records {
            container.block();
            container.set_property(&record.name, record.value.clone())?;
            debug!(
                instance = %instance,
                property = %record.name,
                value = %redactor.redact_json(&record.name, &record.value),
                "Checkpoint property written"
            );
        }

        let deadline = Instant::now() + self.config.checkpoint_timeout;
        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(property)) => {
                    pending.remove(property.as_str());
                }
                Ok(None) => {
                    warn!(instance = %instance, missing = pending.len(), "Container dropped checkpoint observer");
                    return Err(unconfirmed(instance.as_str(), &pending)
                        .with_context("reason", "confirmation channel closed"));
                }
                Err(_) => return Err(unconfirmed(instance.as_str(), &pending)),
            }
        }

        Ok(records.len())
    }

    /// Replay events that arrived after a migration commit, in arrival
    /// order. Call events are not accepted on this path.
    #[instrument(skip_all, fields(instance = %container.instance_id(), events = events.len()))]
    pub fn inject_downstream_events(&self, container: &dyn ComponentContainer, events: &[Value]) -> Result<usize> {
        let decoded = events.iter().map(InputEvent::from_wire).collect::<Result<Vec<_>>>()?;
        if decoded.iter().any(|e| matches!(e, InputEvent::Call(_))) {
            let err = RoamError::call_event_not_allowed(container.instance_id().as_str());
            err.log();
            return Err(err);
        }

        for event in &decoded {
            dispatch(container, event)?;
        }
        debug!(count = decoded.len(), "Downstream events replayed");
        Ok(decoded.len())
    }
}

/// Hand one event to the proxy for its class.
fn dispatch(container: &dyn ComponentContainer, event: &InputEvent) -> Result<()> {
    let outcome = match event {
        InputEvent::Call(call) => container.application_events().replay_call(call),
        InputEvent::ServiceResponse(response) => container.service_events().replay_response(response),
        InputEvent::Runtime(timer) => container.runtime_events().replay_timer(timer),
    };

    outcome.map_err(|e| {
        let reason = e.to_string();
        RoamError::replay_failed(container.instance_id().as_str(), reason)
            .with_context("event", event.kind().as_str())
            .with_source(e)
    })?;

    MigrationMetrics::record_replayed(event.kind().as_str());
    if let InputEvent::Runtime(RuntimeEvent::StartInterval(start)) = event {
        debug!(interval = %start.interval_id, handler = %start.handler_context.handler, "Interval restarted");
    }
    Ok(())
}

fn unconfirmed(instance: &str, pending: &HashSet<&str>) -> RoamError {
    let mut missing: Vec<String> = pending.iter().map(|p| p.to_string()).collect();
    missing.sort();
    RoamError::checkpoint_timeout(instance, &missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        use InjectionPhase::*;
        assert!(Pending.can_transition_to(&CheckpointInProgress));
        assert!(CheckpointComplete.can_transition_to(&ReplayInProgress));
        assert!(!CheckpointInProgress.can_transition_to(&ReplayInProgress));
        assert!(!Done.can_transition_to(&Failed));
        assert!(ReplayInProgress.can_transition_to(&Failed));
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_report_rejects_skipping_checkpoint() {
        let mut report = InjectionReport::new("map-1");
        report.advance(InjectionPhase::CheckpointInProgress).unwrap();
        let err = report.advance(InjectionPhase::ReplayInProgress).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidStateTransition);
    }

    #[test]
    fn test_empty_checkpoint_skips_observer() {
        use crate::container::{ContainerRegistry, InMemoryContainer};

        let registry = Arc::new(ContainerRegistry::new());
        let map = Arc::new(InMemoryContainer::new("map-1"));
        registry.insert(map.clone());
        let injector = StateInjector::new(registry);

        let reports = tokio_test::block_on(injector.inject_state(&[MigrationStateObject::new("map-1")], &mut ())).unwrap();
        assert_eq!(reports[0].properties_restored, 0);
        assert_eq!(reports[0].phase, InjectionPhase::Done);
        assert!(map.writes().is_empty());
        assert_eq!(map.observer_count(), 0);
    }
}
