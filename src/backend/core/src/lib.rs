#![allow(clippy::result_large_err)]
//! # Roam Core
//!
//! Runtime services for distributed component applications whose parts can
//! move between devices while they run.
//!
//! ## Architecture
//!
//! - **Channels**: Link, BackLink and PropertyLink bindings between component
//!   instances, with their wire form
//! - **Broker**: Channel registry with publish/subscribe dispatch, deferred
//!   wiring and per-subscriber blocking
//! - **Containers**: The seam to the runtime that hosts component instances
//! - **Distribution**: Which device hosts which instance
//! - **Migration**: State capture on the source, checkpoint restore and
//!   ordered event replay on the target
//! - **Protocol**: Two-step runtime requests driving channel changes and
//!   migrations
//! - **Telemetry**: Structured logging with redaction, and metrics

pub mod broker;
pub mod channel;
pub mod config;
pub mod container;
pub mod distribution;
pub mod error;
pub mod migration;
pub mod protocol;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, RoamError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::broker::{AddOutcome, BrokerStats, Delivery, EventBroker, PublishReceipt, QueueRelay, RemoteRelay};
    pub use crate::channel::{
        Channel, ChannelKind, ChannelPayload, ComponentMessage, Participant, Publisher, Replier, Requestor,
        Subscriber, SubscriberTarget,
    };
    pub use crate::config::{BrokerConfig, Config, MigrationConfig};
    pub use crate::container::{
        ComponentContainer, ComponentDirectory, ContainerRegistry, InMemoryContainer, InstanceId, LifecycleState,
    };
    pub use crate::distribution::{DeviceId, DistributionManager, StaticDistribution};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, RoamError};
    pub use crate::migration::{
        InjectionListener, InjectionPhase, InjectionReport, InputBacklog, InputEvent, MigrationStateObject,
        StateCapture, StateInjector,
    };
    pub use crate::protocol::{PrepareCode, RuntimeAction, RuntimeAgent, RuntimeRequest, RuntimeResponse};
}
