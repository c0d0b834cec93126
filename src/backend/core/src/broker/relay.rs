//! Forwarding of messages to subscribers hosted on other devices.
//!
//! The wire transport lives outside this crate. The broker only hands it
//! an envelope per remote subscriber.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::channel::{ComponentMessage, SubscriberTarget};
use crate::container::InstanceId;
use crate::distribution::DeviceId;
use crate::error::{ErrorCode, Result, RoamError};

/// A message bound for one remote subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    pub channel: String,
    pub from: InstanceId,
    pub to: InstanceId,
    pub target: SubscriberTarget,
    /// Device hosting `to`, when known
    pub device: Option<DeviceId>,
    pub message: ComponentMessage,
}

pub trait RemoteRelay: Send + Sync {
    fn forward(&self, envelope: RemoteEnvelope) -> Result<()>;
}

/// Relay that queues envelopes on a tokio channel for a transport task.
#[derive(Debug, Clone)]
pub struct QueueRelay {
    tx: mpsc::UnboundedSender<RemoteEnvelope>,
}

impl QueueRelay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RemoteRelay for QueueRelay {
    fn forward(&self, envelope: RemoteEnvelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| RoamError::new(ErrorCode::InternalError, "Remote relay queue is closed"))
    }
}
