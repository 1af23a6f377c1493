//! Transport layer for the Meridian control plane
//!
//! This crate provides:
//! - The `Channel` / `ChannelListener` / `ChannelFactory` traits
//! - TCP channels with length-delimited event framing
//! - In-process memory channels for simulated stations
//! - Static name-to-address resolution

pub mod channel;
pub mod memory;
pub mod resolver;
pub mod tcp;

pub use channel::*;
pub use memory::*;
pub use resolver::*;
pub use tcp::*;
