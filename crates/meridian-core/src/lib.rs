//! Meridian Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the Meridian
//! control plane:
//! - Identifiers (TaskId, PortId, ProducerId, TimerId)
//! - Packed signal codes and the per-protocol signal enums
//! - Events (the unit of communication between tasks)
//! - Typed property values
//! - Lifecycle and result enums
//! - Protocol errors

pub mod error;
pub mod event;
pub mod id;
pub mod result;
pub mod signal;
pub mod state;
pub mod value;

pub use error::*;
pub use event::*;
pub use id::*;
pub use result::*;
pub use signal::*;
pub use state::*;
pub use value::*;
