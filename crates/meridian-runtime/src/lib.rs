//! Meridian task runtime
//!
//! This crate implements the reactor every controller runs on:
//! - Tasks: single-loop reactors driving synchronous handlers
//! - Ports: dialed, listening, and accepted peerings with one owned
//!   channel each, redialing with jittered backoff
//! - Pending request tables with timeout and stale-reply suppression
//! - Timers that fire into the task mailbox

pub mod config;
pub mod pending;
pub mod port;
pub mod station;
pub mod task;

mod timer;

pub use config::TaskConfig;
pub use pending::{PendingRequest, PendingTable};
pub use port::{PortMode, PortSpec};
pub use station::{Station, TaskHandle, TaskSpec};
pub use task::{Flow, TaskContext, TaskEvent, TaskHandler, TaskStats};
