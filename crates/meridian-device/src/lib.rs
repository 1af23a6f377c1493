//! Logical-device lifecycle control
//!
//! A station's hardware is modelled as a tree of logical devices, each
//! owning a set of children it aggregates. This crate provides:
//!
//! - [`LogicalDevice`]: the sans-IO lifecycle state machine, with
//!   quorum-gated claim/prepare/release transitions
//! - [`ChildSet`]: per-child connectivity and confirmed-state tracking
//! - [`DeviceTask`]: the reactor shell that puts a device on the wire
//!
//! Controllers drive a device with in-signals (`Claim`, `Prepare`,
//! `Resume`, ...) and receive the matching past-tense completion with a
//! result code. The device fans every accepted command out to its
//! children and, for the gated transitions, answers only once enough of
//! them have confirmed.

pub mod children;
pub mod device;
pub mod task;

pub use children::{ChildLink, ChildSet};
pub use device::{
    DeviceAction, DeviceConfig, DeviceControl, DeviceEvent, LogicalDevice, NullControl,
    ReleaseOutcome,
};
pub use task::DeviceTask;
