//! Runtime agent: applies manager requests to the broker and injector.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::message::{
    MigrationPayload, ModifyChannelPayload, PrepareCode, RuntimeAction, RuntimeRequest, RuntimeResponse,
};
use crate::broker::{AddOutcome, EventBroker};
use crate::channel::Channel;
use crate::container::{ComponentDirectory, InstanceId};
use crate::error::{Result, RoamError};
use crate::migration::StateInjector;
use crate::telemetry::RuntimeMetrics;

/// Request counters of one agent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStats {
    pub requests: u64,
    pub failures: u64,
}

/// Handles runtime requests for one device.
pub struct RuntimeAgent {
    broker: Arc<EventBroker>,
    directory: Arc<dyn ComponentDirectory>,
    injector: StateInjector,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl RuntimeAgent {
    pub fn new(broker: Arc<EventBroker>, directory: Arc<dyn ComponentDirectory>) -> Self {
        let injector = StateInjector::new(Arc::clone(&directory));
        Self {
            broker,
            directory,
            injector,
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn with_injector(mut self, injector: StateInjector) -> Self {
        self.injector = injector;
        self
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Decode and handle a raw request. Undecodable requests get a failure
    /// response with an empty id.
    pub async fn handle_json(&self, json: &str) -> RuntimeResponse {
        match RuntimeRequest::from_json(json) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                e.log();
                self.requests.fetch_add(1, Ordering::Relaxed);
                self.failures.fetch_add(1, Ordering::Relaxed);
                RuntimeResponse::failure("", PrepareCode::ChannelIntegrationFailure, &e)
            }
        }
    }

    #[instrument(skip(self, request), fields(id = %request.id, action = %request.action))]
    pub async fn handle(&self, request: RuntimeRequest) -> RuntimeResponse {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = match request.action {
            RuntimeAction::PrepModifychannel => self.prepare_modify_channel(&request),
            RuntimeAction::CmitModifychannel => self.commit_modify_channel(&request),
            RuntimeAction::PrepMigrate | RuntimeAction::PrepRealize => self.prepare_migration(&request),
            RuntimeAction::CmitMigrate | RuntimeAction::CmitRealize => self.commit_migration(&request).await,
            RuntimeAction::AbrtMigrate | RuntimeAction::AbrtRealize => self.abort_migration(&request),
        };

        let success = response.is_success();
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        RuntimeMetrics::record_request(request.action.as_str(), success);
        info!(code = ?response.code(), success, "Runtime request handled");
        response
    }

    // ─── Channels ───────────────────────────────────────────────────────────

    fn decode_channels(&self, payload: &ModifyChannelPayload) -> Result<Vec<Channel>> {
        let mut names = HashSet::new();
        payload
            .add
            .iter()
            .map(|p| {
                let channel = Channel::from_payload(p)?;
                if !names.insert(channel.name().to_string()) {
                    return Err(RoamError::duplicate_channel(channel.name()));
                }
                Ok(channel)
            })
            .collect()
    }

    /// Check that every added channel decodes and is new. Nothing changes.
    fn prepare_modify_channel(&self, request: &RuntimeRequest) -> RuntimeResponse {
        let checked = request.payload_as::<ModifyChannelPayload>().and_then(|payload| {
            let channels = self.decode_channels(&payload)?;
            if let Some(existing) = channels.iter().find(|c| self.broker.contains(c.name())) {
                return Err(RoamError::duplicate_channel(existing.name()));
            }
            Ok((channels.len(), payload.remove.len()))
        });

        match checked {
            Ok((add, remove)) => RuntimeResponse::success(
                &request.id,
                PrepareCode::ChannelIntegrationSuccess,
                format!("{} channel(s) can be added, {} removed", add, remove),
            ),
            Err(e) => {
                e.log();
                RuntimeResponse::failure(&request.id, PrepareCode::ChannelIntegrationFailure, &e)
            }
        }
    }

    /// Add every channel, then remove the listed ones.
    fn commit_modify_channel(&self, request: &RuntimeRequest) -> RuntimeResponse {
        let payload = match request.payload_as::<ModifyChannelPayload>() {
            Ok(payload) => payload,
            Err(e) => return RuntimeResponse::failure(&request.id, PrepareCode::ChannelIntegrationFailure, &e),
        };
        let channels = match self.decode_channels(&payload) {
            Ok(channels) => channels,
            Err(e) => {
                e.log();
                return RuntimeResponse::failure(&request.id, PrepareCode::ChannelIntegrationFailure, &e);
            }
        };

        let mut wired = Vec::new();
        let mut deferred = Vec::new();
        for channel in channels {
            let name = channel.name().to_string();
            match self.broker.add_channel(channel) {
                Ok(AddOutcome::Wired) => wired.push(name),
                Ok(AddOutcome::Deferred) => deferred.push(name),
                Err(e) => {
                    return RuntimeResponse::failure(&request.id, PrepareCode::ChannelIntegrationFailure, &e)
                        .with_data(json!({ "wired": wired, "deferred": deferred }));
                }
            }
        }

        let removed: Vec<&String> = payload.remove.iter().filter(|n| self.broker.remove_channel(n)).collect();

        RuntimeResponse::success(
            &request.id,
            PrepareCode::ChannelIntegrationSuccess,
            format!("{} channel(s) added, {} removed", wired.len() + deferred.len(), removed.len()),
        )
        .with_data(json!({ "wired": wired, "deferred": deferred, "removed": removed }))
    }

    // ─── Migration ──────────────────────────────────────────────────────────

    /// Freeze every listed instance that can run here.
    ///
    /// Every instance is checked before any is blocked.
    fn prepare_migration(&self, request: &RuntimeRequest) -> RuntimeResponse {
        let payload = match request.payload_as::<MigrationPayload>() {
            Ok(payload) => payload,
            Err(e) => return RuntimeResponse::failure(&request.id, PrepareCode::NoComponentExecutable, &e),
        };

        let affected = payload.affected_instances();
        if let Some(missing) = affected
            .iter()
            .find(|i| self.directory.lookup(i).is_none() && !payload.has_state_for(i))
        {
            let err = RoamError::container_not_found(missing.as_str())
                .with_context("action", request.action.as_str());
            err.log();
            return RuntimeResponse::failure(&request.id, PrepareCode::NoComponentExecutable, &err);
        }

        let mut blocked_channels = 0;
        for instance in &affected {
            blocked_channels += self.broker.block_channels_of_subscriber(instance);
            if let Some(container) = self.directory.lookup(instance) {
                container.block();
            }
        }

        debug!(instances = affected.len(), blocked_channels, "Migration prepared");
        RuntimeResponse::success(
            &request.id,
            PrepareCode::MigrationPrepared,
            format!("{} instance(s) frozen", affected.len()),
        )
        .with_data(json!({ "blocked_channels": blocked_channels }))
    }

    /// Inject the supplied states, replay downstream events, reopen channels
    /// and drop channels that no longer touch this device.
    async fn commit_migration(&self, request: &RuntimeRequest) -> RuntimeResponse {
        let payload = match request.payload_as::<MigrationPayload>() {
            Ok(payload) => payload,
            Err(e) => return RuntimeResponse::failure(&request.id, PrepareCode::StateInjectionFailure, &e),
        };

        let reports = match self.injector.inject_state(&payload.states, &mut ()).await {
            Ok(reports) => reports,
            Err(e) => return RuntimeResponse::failure(&request.id, PrepareCode::StateInjectionFailure, &e),
        };

        let mut downstream = 0;
        for batch in &payload.downstream {
            let result = self
                .directory
                .lookup(&batch.instance_id)
                .ok_or_else(|| RoamError::container_not_found(batch.instance_id.as_str()))
                .and_then(|c| self.injector.inject_downstream_events(c.as_ref(), &batch.events));
            match result {
                Ok(n) => downstream += n,
                Err(e) => return RuntimeResponse::failure(&request.id, PrepareCode::StateInjectionFailure, &e),
            }
        }

        let wired = self.broker.wire_pending();
        for instance in payload.affected_instances() {
            self.broker.unblock_channels_of_subscriber(&instance);
            if let Some(container) = self.directory.lookup(&instance) {
                container.unblock();
            }
        }
        let purged = self.purge_departed(&payload.departed);

        RuntimeResponse::success(
            &request.id,
            PrepareCode::StateInjectionSuccess,
            format!("{} component(s) restored", reports.len()),
        )
        .with_data(json!({
            "reports": reports,
            "downstream_events": downstream,
            "wired": wired,
            "purged": purged,
        }))
    }

    /// Drop channels that only linked departed instances to peers hosted
    /// elsewhere.
    fn purge_departed(&self, departed: &[InstanceId]) -> Vec<String> {
        departed
            .iter()
            .flat_map(|instance| self.broker.remove_channels_from_component(instance))
            .collect()
    }

    fn abort_migration(&self, request: &RuntimeRequest) -> RuntimeResponse {
        let payload = request.payload_as::<MigrationPayload>().unwrap_or_else(|e| {
            warn!(error = %e, "Undecodable abort payload, nothing to unblock");
            MigrationPayload::default()
        });

        let mut unblocked = 0;
        for instance in payload.affected_instances() {
            unblocked += self.broker.unblock_channels_of_subscriber(&instance);
            if let Some(container) = self.directory.lookup(&instance) {
                container.unblock();
            }
        }

        RuntimeResponse::success(&request.id, PrepareCode::MigrationAborted, "Migration aborted")
            .with_data(json!({ "unblocked_channels": unblocked }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ComponentContainer, ContainerRegistry, InMemoryContainer};
    use crate::distribution::StaticDistribution;

    fn agent() -> (RuntimeAgent, Arc<InMemoryContainer>) {
        let registry = Arc::new(ContainerRegistry::new());
        let map = Arc::new(InMemoryContainer::new("map-1"));
        registry.insert(map.clone());
        let broker = Arc::new(EventBroker::new(registry.clone(), Arc::new(StaticDistribution::new("here"))));
        (RuntimeAgent::new(broker, registry), map)
    }

    #[tokio::test]
    async fn test_prepare_unknown_instance() {
        let (agent, _) = agent();
        let request = RuntimeRequest::new(
            "1",
            RuntimeAction::PrepMigrate,
            json!({ "instances": ["ghost"] }),
        );

        let response = agent.handle(request).await;
        assert!(!response.is_success());
        assert_eq!(response.code(), PrepareCode::NoComponentExecutable);
        assert_eq!(agent.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_prepare_then_abort() {
        let (agent, map) = agent();
        let instances = json!({ "instances": ["map-1"] });

        let response = agent
            .handle(RuntimeRequest::new("1", RuntimeAction::PrepMigrate, instances.clone()))
            .await;
        assert_eq!(response.code(), PrepareCode::MigrationPrepared);
        assert!(map.is_blocked());

        let response = agent
            .handle(RuntimeRequest::new("2", RuntimeAction::AbrtMigrate, instances))
            .await;
        assert_eq!(response.code(), PrepareCode::MigrationAborted);
        assert!(!map.is_blocked());
    }

    #[tokio::test]
    async fn test_bad_json() {
        let (agent, _) = agent();
        let response = agent.handle_json("{not json").await;
        assert!(!response.is_success());
        assert_eq!(response.id, "");
    }
}
