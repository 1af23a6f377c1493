//! Identity types for the Meridian control plane
//!
//! Identifiers are small fixed-width integers: they cross the wire in
//! registration payloads and key the bookkeeping tables (pending replies,
//! in-flight batches, timers), so cheap copying and ordering matter more
//! than global uniqueness.

use std::fmt;

/// Task identity - one per reactor instance within a station
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    pub const ZERO: TaskId = TaskId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        TaskId(id)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({:08x})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Port identity - unique within its owning task
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl PortId {
    #[inline]
    pub fn new(id: u32) -> Self {
        PortId(id)
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Update-producer identity - assigned per forwarder, carried in every
/// batch envelope so the collector can keep per-producer sequence state
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ProducerId(pub u32);

impl ProducerId {
    pub const ZERO: ProducerId = ProducerId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        ProducerId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        ProducerId(u32::from_be_bytes(bytes))
    }
}

impl fmt::Debug for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Producer({:08x})", self.0)
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Timer identity - unique within its owning task, never reused
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl TimerId {
    #[inline]
    pub fn new(id: u64) -> Self {
        TimerId(id)
    }
}

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_id_roundtrip() {
        let id = ProducerId::new(0xDEAD_BEEF);
        let bytes = id.to_bytes();
        let recovered = ProducerId::from_bytes(bytes);
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_id_ordering() {
        assert!(TimerId::new(1) < TimerId::new(2));
        assert!(PortId::new(3) > PortId::new(1));
    }
}
