//! Runtime request protocol.
//!
//! A manager drives channel changes and migrations through two-step
//! requests. [`RuntimeAgent`] answers them for one device.

pub mod agent;
pub mod message;

pub use agent::{AgentStats, RuntimeAgent};
pub use message::{
    DownstreamBatch, MigrationPayload, ModifyChannelPayload, PrepareCode, ResponsePayload, ResponseStatus,
    RuntimeAction, RuntimeRequest, RuntimeResponse,
};
