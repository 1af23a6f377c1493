//! Outstanding request tracking
//!
//! Each dial port keeps one table of requests awaiting a reply. A reply
//! completes its entry exactly once; anything arriving afterwards with
//! the same sequence number is stale and must not reach the handler.

use std::collections::BTreeMap;
use std::time::Instant;

use meridian_core::Signal;

/// One request awaiting its reply
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub seq_nr: u16,
    pub signal: Signal,
    pub sent_at: Instant,
}

/// Requests in flight on one port, ordered by sequence number
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: BTreeMap<u16, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable::default()
    }

    pub fn insert(&mut self, seq_nr: u16, signal: Signal) {
        self.entries.insert(
            seq_nr,
            PendingRequest {
                seq_nr,
                signal,
                sent_at: Instant::now(),
            },
        );
    }

    /// Complete an outstanding request; returns `None` for unknown or
    /// already completed sequence numbers
    pub fn complete(&mut self, seq_nr: u16) -> Option<PendingRequest> {
        self.entries.remove(&seq_nr)
    }

    pub fn contains(&self, seq_nr: u16) -> bool {
        self.entries.contains_key(&seq_nr)
    }

    /// Remove and return every outstanding request, oldest first
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        let entries = std::mem::take(&mut self.entries);
        entries.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
