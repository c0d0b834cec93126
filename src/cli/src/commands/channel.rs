//! Channel payload inspection.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use roam_core::channel::{Channel, ChannelPayload, RoleDescriptor};

use super::read_input;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ChannelArgs {
    /// JSON file holding one channel payload or an array of them
    pub file: PathBuf,
}

#[derive(Debug, Serialize, Tabled)]
struct ChannelRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Senders")]
    senders: String,
    #[tabled(rename = "Receivers")]
    receivers: String,
}

fn describe(roles: &[RoleDescriptor]) -> String {
    roles
        .iter()
        .map(|r| format!("{}:{} ({})", r.instid, r.cename, r.cetype))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ChannelRow {
    fn from_channel(channel: &Channel) -> Self {
        let payload = channel.to_payload();
        Self {
            name: payload.name.clone(),
            kind: format!("{} ({})", channel.kind(), payload.kind),
            senders: describe(&payload.sender),
            receivers: describe(&payload.receiver),
        }
    }
}

/// Decode every payload in `content`, failing on the first invalid one.
pub(crate) fn decode(content: &str) -> Result<Vec<Channel>> {
    let payloads = ChannelPayload::parse_many(content).context("Failed to parse channel payloads")?;
    payloads
        .iter()
        .map(|p| Channel::from_payload(p).with_context(|| format!("Invalid channel '{}'", p.name)))
        .collect()
}

pub fn execute(args: ChannelArgs, format: OutputFormat) -> Result<()> {
    let content = read_input(&args.file)?;
    let channels = decode(&content)?;

    match format {
        OutputFormat::Table => {
            let rows: Vec<ChannelRow> = channels.iter().map(ChannelRow::from_channel).collect();
            output::print_table(&rows);
            output::print_success(&format!("{} channel(s) decoded", rows.len()));
            Ok(())
        }
        _ => output::print_item(&channels, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_and_describe() {
        let content = r#"[{
            "type": 0,
            "name": "list_to_map",
            "sender": [{"cetype": "event", "cename": "selected", "instid": "list-1"}],
            "receiver": [{"cetype": "operation", "cename": "focus", "instid": "map-1"}]
        }]"#;

        let channels = decode(content).unwrap();
        let row = ChannelRow::from_channel(&channels[0]);
        assert_eq!(row.name, "list_to_map");
        assert_eq!(row.senders, "list-1:selected (event)");
        assert_eq!(row.receivers, "map-1:focus (operation)");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let content = r#"{"type": 9, "name": "x", "sender": [], "receiver": []}"#;
        assert!(decode(content).is_err());
    }
}
