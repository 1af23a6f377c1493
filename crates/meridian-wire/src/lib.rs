//! Meridian Wire Protocol - Binary event framing
//!
//! This crate implements the wire format for control-plane events:
//! - Fixed frame header (8 bytes, network byte order)
//! - Whole-frame encode/decode and incremental assembly for stream
//!   transports
//! - Payload codecs for the directory, linking, and update-forwarding
//!   protocols

pub mod frame;
pub mod header;
pub mod payload;

pub use frame::*;
pub use header::*;
pub use payload::*;
