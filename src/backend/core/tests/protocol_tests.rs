//! End-to-end tests for the runtime request protocol.

use std::sync::Arc;
use std::time::Duration;

use roam_core::broker::EventBroker;
use roam_core::channel::{Channel, ComponentMessage, Publisher, Subscriber};
use roam_core::config::MigrationConfig;
use roam_core::container::{
    ComponentContainer, ComponentDirectory, Confirmation, ContainerRegistry, InMemoryContainer, InstanceId,
};
use roam_core::distribution::StaticDistribution;
use roam_core::migration::StateInjector;
use roam_core::protocol::{PrepareCode, ResponseStatus, RuntimeAction, RuntimeAgent, RuntimeRequest, RuntimeResponse};
use roam_core::ErrorCode;
use serde_json::{json, Value};

struct Runtime {
    agent: RuntimeAgent,
    registry: Arc<ContainerRegistry>,
    distribution: Arc<StaticDistribution>,
}

impl Runtime {
    fn new(instances: &[&str]) -> Self {
        let registry = Arc::new(ContainerRegistry::new());
        for id in instances {
            registry.insert(Arc::new(InMemoryContainer::new(*id)));
        }
        let distribution = Arc::new(StaticDistribution::new("laptop"));
        let broker = Arc::new(EventBroker::new(registry.clone(), distribution.clone()));
        Self {
            agent: RuntimeAgent::new(broker, registry.clone()),
            registry,
            distribution,
        }
    }

    fn with_container(self, container: InMemoryContainer) -> Self {
        self.registry.insert(Arc::new(container));
        self
    }

    fn container(&self, id: &str) -> Arc<dyn ComponentContainer> {
        self.registry.lookup(&InstanceId::from(id)).expect("container registered")
    }

    fn broker(&self) -> &Arc<EventBroker> {
        self.agent.broker()
    }

    async fn send(&self, action: RuntimeAction, payload: Value) -> RuntimeResponse {
        self.agent.handle(RuntimeRequest::generate(action, payload)).await
    }
}

fn link(name: &str, from: &str, to: &str) -> Value {
    let channel = Channel::link(name, vec![Publisher::new(from, "moved")], vec![Subscriber::operation(to, "follow")])
        .unwrap();
    serde_json::to_value(channel.to_payload()).unwrap()
}

fn timer(timestamp: u64) -> Value {
    json!({
        "event": "TIMEREVENT",
        "timestamp": timestamp,
        "tid": format!("t{timestamp}"),
        "delay": 100,
        "arguments": [],
        "handlerId": "tick"
    })
}

fn data(response: &RuntimeResponse) -> &Value {
    response.payload.data.as_ref().expect("response carries data")
}

#[tokio::test]
async fn test_modify_channel_prepare_does_not_mutate() {
    let rt = Runtime::new(&["a", "b"]);
    let payload = json!({ "add": [link("A_to_B", "a", "b")] });

    let prepared = rt.send(RuntimeAction::PrepModifychannel, payload.clone()).await;
    assert_eq!(prepared.code(), PrepareCode::ChannelIntegrationSuccess);
    assert!(rt.broker().channel_names().is_empty());

    let committed = rt.send(RuntimeAction::CmitModifychannel, payload).await;
    assert_eq!(committed.code(), PrepareCode::ChannelIntegrationSuccess);
    assert_eq!(data(&committed)["wired"], json!(["A_to_B"]));
    assert!(rt.broker().publish(&InstanceId::from("a"), &ComponentMessage::new("moved", json!(1))));
}

#[tokio::test]
async fn test_modify_channel_rejects_duplicates() {
    let rt = Runtime::new(&["a", "b"]);

    let twice = json!({ "add": [link("A_to_B", "a", "b"), link("A_to_B", "b", "a")] });
    let response = rt.send(RuntimeAction::PrepModifychannel, twice).await;
    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(response.payload.error_code, Some(ErrorCode::DuplicateChannel));

    rt.send(RuntimeAction::CmitModifychannel, json!({ "add": [link("A_to_B", "a", "b")] }))
        .await;
    let again = rt
        .send(RuntimeAction::PrepModifychannel, json!({ "add": [link("A_to_B", "b", "a")] }))
        .await;
    assert_eq!(again.code(), PrepareCode::ChannelIntegrationFailure);
    assert_eq!(rt.broker().subscription_count("A_to_B"), Some(1));
}

#[tokio::test]
async fn test_modify_channel_adds_then_removes() {
    let rt = Runtime::new(&["a", "b"]);
    rt.send(RuntimeAction::CmitModifychannel, json!({ "add": [link("old", "a", "b")] }))
        .await;

    let response = rt
        .send(
            RuntimeAction::CmitModifychannel,
            json!({ "add": [link("new", "b", "a")], "remove": ["old", "never-existed"] }),
        )
        .await;

    assert!(response.is_success());
    assert_eq!(data(&response)["removed"], json!(["old"]));
    assert_eq!(rt.broker().channel_names(), vec!["new".to_string()]);
}

#[tokio::test]
async fn test_realize_wires_deferred_channels_and_restores_state() {
    let rt = Runtime::new(&["a"]);
    let added = rt
        .send(RuntimeAction::CmitModifychannel, json!({ "add": [link("A_to_B", "a", "b")] }))
        .await;
    assert_eq!(data(&added)["deferred"], json!(["A_to_B"]));
    assert_eq!(rt.broker().is_wired("A_to_B"), Some(false));

    let rt = rt.with_container(InMemoryContainer::new("b"));
    let payload = json!({
        "instances": ["b"],
        "states": [{
            "instanceid": "b",
            "checkpoint": [{ "name": "zoom", "type": "number", "value": 11 }],
            "inputEvents": [timer(20), timer(10)]
        }]
    });

    let prepared = rt.send(RuntimeAction::PrepRealize, payload.clone()).await;
    assert_eq!(prepared.code(), PrepareCode::MigrationPrepared);
    assert!(rt.container("b").is_blocked());

    let committed = rt.send(RuntimeAction::CmitRealize, payload).await;
    assert_eq!(committed.code(), PrepareCode::StateInjectionSuccess);
    assert_eq!(data(&committed)["wired"], json!(["A_to_B"]));
    assert_eq!(data(&committed)["reports"][0]["timers_replayed"], json!(2));

    let b = rt.container("b");
    assert!(!b.is_blocked());
    assert_eq!(b.get_property("zoom"), Some(json!(11)));
    assert_eq!(rt.broker().is_blocked("A_to_B"), Some(false));
}

#[tokio::test]
async fn test_migrate_commit_replays_downstream_and_purges_departed() {
    let rt = Runtime::new(&["a", "b"]);
    rt.distribution.place("c", "phone");
    rt.send(
        RuntimeAction::CmitModifychannel,
        json!({ "add": [link("A_to_B", "a", "b"), link("B_to_C", "b", "c")] }),
    )
    .await;

    rt.distribution.place("b", "phone");
    let payload = json!({
        "instances": ["a"],
        "states": [{ "instanceid": "a", "checkpoint": [{ "name": "x", "value": 1 }] }],
        "downstream": [{ "instanceid": "a", "events": [timer(5)] }],
        "departed": ["b"]
    });

    assert!(rt.send(RuntimeAction::PrepMigrate, payload.clone()).await.is_success());
    let committed = rt.send(RuntimeAction::CmitMigrate, payload).await;

    assert_eq!(committed.code(), PrepareCode::StateInjectionSuccess);
    assert_eq!(data(&committed)["downstream_events"], json!(1));
    assert_eq!(data(&committed)["purged"], json!(["B_to_C"]));
    assert!(rt.broker().contains("A_to_B"));
    assert!(!rt.broker().contains("B_to_C"));
}

#[tokio::test]
async fn test_downstream_call_event_fails_commit() {
    let rt = Runtime::new(&["a"]);
    let call = json!({
        "event": "CALLEVENT",
        "timestamp": 3,
        "componentid": "map",
        "instanceid": "a",
        "name": "setCenter",
        "type": "operation",
        "message": { "message": { "header": { "name": "moved" }, "body": {} } }
    });
    let payload = json!({ "instances": ["a"], "downstream": [{ "instanceid": "a", "events": [call] }] });

    let response = rt.send(RuntimeAction::CmitMigrate, payload).await;
    assert_eq!(response.code(), PrepareCode::StateInjectionFailure);
    assert_eq!(response.payload.error_code, Some(ErrorCode::CallEventNotAllowed));
}

#[tokio::test]
async fn test_checkpoint_timeout_fails_commit() {
    let registry = Arc::new(ContainerRegistry::new());
    registry.insert(Arc::new(InMemoryContainer::new("a").with_confirmation(Confirmation::Never)));
    let broker = Arc::new(EventBroker::new(registry.clone(), Arc::new(StaticDistribution::new("laptop"))));
    let injector = StateInjector::new(registry.clone()).with_config(MigrationConfig {
        checkpoint_timeout: Duration::from_millis(30),
        ..MigrationConfig::default()
    });
    let agent = RuntimeAgent::new(broker, registry).with_injector(injector);

    let payload = json!({ "states": [{ "instanceid": "a", "checkpoint": [{ "name": "x", "value": 1 }] }] });
    let response = agent
        .handle(RuntimeRequest::new("r-1", RuntimeAction::CmitRealize, payload))
        .await;

    assert_eq!(response.id, "r-1");
    assert_eq!(response.code(), PrepareCode::StateInjectionFailure);
    assert_eq!(response.payload.error_code, Some(ErrorCode::CheckpointTimeout));
    assert_eq!(agent.stats().failures, 1);
}

#[tokio::test]
async fn test_raw_request_echoes_numeric_id() {
    let rt = Runtime::new(&["a"]);
    let raw = r#"{"id": 7, "action": "ABRT_MIGRATE", "payload": {"instances": ["a"]}}"#;

    let response = rt.agent.handle_json(raw).await;
    assert_eq!(response.id, "7");
    assert_eq!(response.code(), PrepareCode::MigrationAborted);

    let encoded: Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
    assert_eq!(encoded["status"], json!("SUCCESS"));
    assert_eq!(encoded["payload"]["code"], json!("MIGRATION_ABORTED"));
}

#[tokio::test]
async fn test_unknown_action_is_reported() {
    let rt = Runtime::new(&[]);
    let response = rt.agent.handle_json(r#"{"id": "x", "action": "SELF_DESTRUCT"}"#).await;

    assert!(!response.is_success());
    assert_eq!(response.payload.error_code, Some(ErrorCode::UnknownAction));
}
