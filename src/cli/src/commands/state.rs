//! Migration state inspection.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use roam_core::config::Config;
use roam_core::migration::{InputEvent, MigrationStateObject, PropertyRecord, ReplayPlan, RuntimeEvent};
use roam_core::telemetry::SensitiveFieldRedactor;

use super::read_input;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct StateArgs {
    /// JSON file holding one migration state object or an array of them
    pub file: PathBuf,
}

#[derive(Debug, Serialize, Tabled)]
pub(crate) struct PropertyRow {
    #[tabled(rename = "Property")]
    name: String,
    #[tabled(rename = "Type")]
    datatype: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Debug, Serialize, Tabled)]
pub(crate) struct EventRow {
    #[tabled(rename = "#")]
    order: usize,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Debug, Serialize)]
struct ComponentView {
    instance_id: String,
    checkpoint: Vec<PropertyRow>,
    replay: Vec<EventRow>,
}

fn property_row(record: &PropertyRecord) -> PropertyRow {
    let redacted = SensitiveFieldRedactor::global().redact_json(&record.name, &record.value);
    PropertyRow {
        name: record.name.clone(),
        datatype: record.datatype.clone(),
        value: redacted.to_string(),
    }
}

fn format_timestamp(millis: f64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis as i64) {
        Some(at) if millis >= 1.0e12 => format!("{} ({})", millis, at.format("%H:%M:%S%.3f")),
        _ => millis.to_string(),
    }
}

/// One-line summary of what replaying `event` does.
pub(crate) fn describe_event(event: &InputEvent) -> String {
    match event {
        InputEvent::Call(call) => format!("{} on {}", call.name, call.instance_id),
        InputEvent::ServiceResponse(response) => format!("{} {}", response.status, response.status_text),
        InputEvent::Runtime(RuntimeEvent::Interval(tick)) => {
            format!("interval {} every {}ms (tick {})", tick.interval_id, tick.period_ms, tick.count)
        }
        InputEvent::Runtime(RuntimeEvent::Timeout(timer)) => {
            format!("timer {} after {}ms", timer.timer_id, timer.delay_ms)
        }
        InputEvent::Runtime(RuntimeEvent::StartInterval(start)) => {
            format!("restart interval {} via {}", start.interval_id, start.handler_context.handler)
        }
    }
}

pub(crate) fn event_rows(plan: &ReplayPlan) -> Vec<EventRow> {
    plan.events
        .iter()
        .enumerate()
        .map(|(i, event)| EventRow {
            order: i + 1,
            timestamp: format_timestamp(event.timestamp()),
            kind: event.kind().as_str().to_string(),
            detail: describe_event(event),
        })
        .collect()
}

fn view(plan: &ReplayPlan) -> ComponentView {
    ComponentView {
        instance_id: plan.instance_id.to_string(),
        checkpoint: plan.checkpoint.iter().map(property_row).collect(),
        replay: event_rows(plan),
    }
}

/// Parse the file and build a replay plan for every state object.
pub(crate) fn load_plans(path: &std::path::Path, config: &Config) -> Result<(Vec<MigrationStateObject>, Vec<ReplayPlan>)> {
    let content = read_input(path)?;
    let states = MigrationStateObject::parse_many(&content).context("Failed to parse migration state")?;
    let plans = states
        .iter()
        .map(|s| {
            s.replay_plan(&config.migration)
                .with_context(|| format!("Invalid state for '{}'", s.instance_id))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((states, plans))
}

pub fn execute(args: StateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let (_, plans) = load_plans(&args.file, config)?;
    let views: Vec<ComponentView> = plans.iter().map(view).collect();

    match format {
        OutputFormat::Table => {
            for component in &views {
                output::print_header(&format!("Component {}", component.instance_id));
                output::print_detail("Properties", &component.checkpoint.len().to_string());
                output::print_detail("Events", &component.replay.len().to_string());
                println!();
                output::print_table(&component.checkpoint);
                output::print_table(&component.replay);
            }
            output::print_success(&format!("{} state object(s) valid", views.len()));
            Ok(())
        }
        _ => output::print_item(&views, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_follow_timestamp_order() {
        let state = MigrationStateObject::new("map-1")
            .with_property("zoom", json!(4))
            .with_event(json!({
                "event": "TIMEREVENT",
                "timestamp": 200,
                "tid": "t1",
                "delay": 50,
                "arguments": [],
                "handlerId": "h1"
            }))
            .with_event(json!({
                "event": "XHREVENT",
                "timestamp": 100,
                "state": 4,
                "status": 200,
                "statusText": "OK",
                "response": "{}",
                "responseType": "json",
                "responseHeaders": {}
            }));

        let plan = state.replay_plan(&Config::default().migration).unwrap();
        let rows = event_rows(&plan);
        assert_eq!(rows[0].kind, "XHREVENT");
        assert_eq!(rows[1].detail, "timer t1 after 50ms");
        assert_eq!(view(&plan).checkpoint[0].datatype, "number");
    }
}
