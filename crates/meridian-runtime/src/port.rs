//! Port bookkeeping
//!
//! A port is one logical peering of a task: either dialed out to a
//! named endpoint (with automatic reconnect), bound as a listener, or
//! spawned for an accepted inbound connection. Each port owns exactly
//! one channel through its driver task.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use meridian_core::{Event, PortId, PortKind, PortState, ProtocolId};
use meridian_transport::ChannelAddr;

use crate::pending::PendingTable;

/// How a port comes into existence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortMode {
    /// Dial the resolved endpoint and keep redialing when it drops
    Dial,
    /// Bind a listener and surface accepted connections as new ports
    Listen,
}

/// Declaration of one port in a task spec
#[derive(Clone, Debug)]
pub struct PortSpec {
    pub name: String,
    pub kind: PortKind,
    pub protocol: ProtocolId,
    pub mode: PortMode,
    /// Explicit address; when absent the port name is resolved through
    /// the station resolver
    pub addr: Option<ChannelAddr>,
}

impl PortSpec {
    pub fn dial(name: impl Into<String>, kind: PortKind, protocol: ProtocolId) -> Self {
        PortSpec {
            name: name.into(),
            kind,
            protocol,
            mode: PortMode::Dial,
            addr: None,
        }
    }

    pub fn listen(name: impl Into<String>, protocol: ProtocolId) -> Self {
        PortSpec {
            name: name.into(),
            kind: PortKind::Response,
            protocol,
            mode: PortMode::Listen,
            addr: None,
        }
    }

    pub fn with_addr(mut self, addr: ChannelAddr) -> Self {
        self.addr = Some(addr);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PortOrigin {
    Dialed,
    Accepted { listener: PortId },
    Listener,
}

pub(crate) struct PortEntry {
    pub(crate) name: String,
    pub(crate) kind: PortKind,
    pub(crate) protocol: ProtocolId,
    pub(crate) state: PortState,
    pub(crate) origin: PortOrigin,
    /// Outbound queue into the driver; listeners have none
    pub(crate) out_tx: Option<mpsc::Sender<Event>>,
    pub(crate) next_seq: u16,
    pub(crate) pending: PendingTable,
    pub(crate) cancel: CancellationToken,
}

impl PortEntry {
    /// Allocate the next request sequence number, skipping zero, which
    /// marks unsequenced notifications on the wire
    pub(crate) fn alloc_seq(&mut self) -> u16 {
        self.next_seq = self.next_seq.wrapping_add(1);
        if self.next_seq == 0 {
            self.next_seq = 1;
        }
        self.next_seq
    }
}
