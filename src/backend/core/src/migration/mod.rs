//! Migration of live component state between devices.
//!
//! - [`event`]: typed input events and their wire form
//! - [`state`]: migration state objects and replay plans
//! - [`capture`]: source-side backlog and capture
//! - [`injector`]: target-side checkpoint restore and replay

pub mod capture;
pub mod event;
pub mod injector;
pub mod state;

pub use capture::{InputBacklog, StateCapture};
pub use event::{
    CallEvent, HandlerContext, InputEvent, InputEventKind, IntervalEvent, RuntimeEvent, ServiceResponseEvent,
    StartIntervalEvent, TimeoutEvent,
};
pub use injector::{InjectionListener, InjectionPhase, InjectionReport, StateInjector};
pub use state::{MigrationStateObject, PropertyRecord, ReplayPlan};
