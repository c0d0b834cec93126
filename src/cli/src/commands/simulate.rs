//! Offline rehearsal of a realize: channels are integrated, state objects
//! are injected into in-memory containers through the runtime protocol, and
//! everything the containers saw is printed in order.

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;

use roam_core::broker::EventBroker;
use roam_core::channel::Channel;
use roam_core::config::Config;
use roam_core::container::{ComponentContainer, Confirmation, ContainerRegistry, InMemoryContainer, InstanceId};
use roam_core::distribution::StaticDistribution;
use roam_core::migration::StateInjector;
use roam_core::protocol::{RuntimeAction, RuntimeAgent, RuntimeRequest, RuntimeResponse};
use roam_core::telemetry::SensitiveFieldRedactor;

use super::{channel, read_input, state};
use crate::output::{self, OutputFormat};

const SIMULATED_DEVICE: &str = "simulator";

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum ConfirmMode {
    /// Containers confirm property writes inside the write
    #[default]
    Immediate,
    /// Containers confirm from a background task
    Deferred,
    /// Containers never confirm, so the checkpoint times out
    Never,
}

impl From<ConfirmMode> for Confirmation {
    fn from(mode: ConfirmMode) -> Self {
        match mode {
            ConfirmMode::Immediate => Confirmation::Immediate,
            ConfirmMode::Deferred => Confirmation::Deferred,
            ConfirmMode::Never => Confirmation::Never,
        }
    }
}

#[derive(Args)]
pub struct SimulateArgs {
    /// JSON file holding the migration state objects to inject
    pub state_file: PathBuf,

    /// JSON file holding channel payloads to integrate first
    #[arg(long)]
    pub channels: Option<PathBuf>,

    /// How the simulated containers confirm property writes
    #[arg(long, value_enum, default_value = "immediate")]
    pub confirm: ConfirmMode,

    /// Override the checkpoint timeout, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Tabled)]
struct RequestRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl RequestRow {
    fn new(action: RuntimeAction, response: &RuntimeResponse) -> Self {
        Self {
            action: action.to_string(),
            status: format!("{:?}", response.status),
            code: format!("{:?}", response.code()),
            message: response.payload.message.clone(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct DispatchRow {
    #[tabled(rename = "#")]
    step: usize,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    requests: Vec<RequestRow>,
    dispatch: Vec<DispatchRow>,
    properties: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

struct Simulation {
    agent: RuntimeAgent,
    containers: Vec<Arc<InMemoryContainer>>,
    requests: Vec<RequestRow>,
}

impl Simulation {
    fn new(config: &Config, instances: &[InstanceId], confirm: ConfirmMode) -> Self {
        let registry = Arc::new(ContainerRegistry::new());
        let containers: Vec<Arc<InMemoryContainer>> = instances
            .iter()
            .map(|id| Arc::new(InMemoryContainer::new(id.clone()).with_confirmation(confirm.into())))
            .collect();
        for container in &containers {
            registry.insert(container.clone());
        }

        let broker = EventBroker::new(registry.clone(), Arc::new(StaticDistribution::new(SIMULATED_DEVICE)))
            .with_config(config.broker.clone());
        let injector = StateInjector::new(registry.clone()).with_config(config.migration.clone());
        let agent = RuntimeAgent::new(Arc::new(broker), registry).with_injector(injector);

        Self {
            agent,
            containers,
            requests: Vec::new(),
        }
    }

    async fn send(&mut self, action: RuntimeAction, payload: serde_json::Value) -> RuntimeResponse {
        let response = self.agent.handle(RuntimeRequest::generate(action, payload)).await;
        self.requests.push(RequestRow::new(action, &response));
        response
    }

    /// Everything the containers recorded, writes before replays per
    /// container, containers in injection order.
    fn dispatch_log(&self) -> Vec<DispatchRow> {
        let redactor = SensitiveFieldRedactor::global();
        let mut rows = Vec::new();
        for container in &self.containers {
            let instance = container.instance_id().to_string();
            for write in container.writes() {
                let blocked = if write.blocked { "blocked" } else { "open" };
                rows.push((
                    instance.clone(),
                    "set_property".to_string(),
                    format!(
                        "{} = {} ({}, {:?})",
                        write.property,
                        redactor.redact_json(&write.property, &write.value),
                        blocked,
                        write.lifecycle
                    ),
                ));
            }
            for event in container.replayed() {
                rows.push((instance.clone(), event.kind().as_str().to_string(), state::describe_event(&event)));
            }
        }

        rows.into_iter()
            .enumerate()
            .map(|(i, (instance, action, detail))| DispatchRow {
                step: i + 1,
                instance,
                action,
                detail,
            })
            .collect()
    }

    fn properties(&self) -> BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        self.containers
            .iter()
            .map(|c| (c.instance_id().to_string(), c.properties()))
            .collect()
    }
}

/// Instances named by states first, then any extra ones the channels name.
fn instances_of(states: &[InstanceId], channels: &[Channel]) -> Vec<InstanceId> {
    let mut all: Vec<InstanceId> = states.to_vec();
    for instance in channels.iter().flat_map(|c| c.instances()) {
        if !all.contains(instance) {
            all.push(instance.clone());
        }
    }
    all
}

pub async fn execute(args: SimulateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let mut config = config.clone();
    if let Some(ms) = args.timeout_ms {
        config.migration.checkpoint_timeout = Duration::from_millis(ms);
    }

    let (states, _) = state::load_plans(&args.state_file, &config)?;
    let channels = match &args.channels {
        Some(path) => channel::decode(&read_input(path)?)?,
        None => Vec::new(),
    };

    let state_instances: Vec<InstanceId> = states.iter().map(|s| s.instance_id.clone()).collect();
    let mut sim = Simulation::new(&config, &instances_of(&state_instances, &channels), args.confirm);

    if !channels.is_empty() {
        let payload = json!({ "add": channels.iter().map(Channel::to_payload).collect::<Vec<_>>() });
        let prepared = sim.send(RuntimeAction::PrepModifychannel, payload.clone()).await;
        if prepared.is_success() {
            sim.send(RuntimeAction::CmitModifychannel, payload).await;
        }
    }

    let realize = json!({ "instances": state_instances, "states": states });
    let prepared = sim.send(RuntimeAction::PrepRealize, realize.clone()).await;
    let committed = if prepared.is_success() {
        sim.send(RuntimeAction::CmitRealize, realize).await
    } else {
        sim.send(RuntimeAction::AbrtRealize, realize).await
    };

    let report = SimulationReport {
        dispatch: sim.dispatch_log(),
        properties: sim.properties(),
        requests: std::mem::take(&mut sim.requests),
    };

    match format {
        OutputFormat::Table => {
            output::print_header("Requests");
            output::print_table(&report.requests);
            output::print_header("Dispatch log");
            output::print_table(&report.dispatch);
            let stats = sim.agent.broker().stats();
            output::print_detail("Channels", &format!("{} ({} wired)", stats.channels, stats.wired));
        }
        _ => output::print_item(&report, format)?,
    }

    if !committed.is_success() {
        bail!("Simulation failed: {}", committed.payload.message);
    }
    if matches!(format, OutputFormat::Table) {
        output::print_success(&format!("{} component(s) restored", states.len()));
    }
    Ok(())
}
