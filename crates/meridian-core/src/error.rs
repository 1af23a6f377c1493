//! Error types for the Meridian control plane

use thiserror::Error;

use crate::{Direction, PortId, PortKind, ProtocolId};

/// Core Meridian errors
#[derive(Error, Debug)]
pub enum MeridianError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown signal code: {0:#06x}")]
    UnknownSignal(u16),

    #[error("Unknown result code: {0:#04x}")]
    UnknownResultCode(u8),

    #[error("Frame too large: {size} > {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    // Transport errors
    #[error("Address resolution failed for {0}")]
    AddressResolution(String),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Dispatch errors
    #[error("{direction:?} event not sendable on {kind} port")]
    InvalidDirection { kind: PortKind, direction: Direction },

    #[error("Protocol mismatch: port speaks {expected}, event is {got}")]
    ProtocolMismatch {
        expected: ProtocolId,
        got: ProtocolId,
    },

    #[error("Port {0} is not open")]
    PortNotOpen(String),

    #[error("Unknown port: {0:?}")]
    UnknownPort(PortId),

    #[error("Send queue full on port {0}")]
    SendQueueFull(String),
}

/// Result type for Meridian operations
pub type MeridianResult<T> = Result<T, MeridianError>;
