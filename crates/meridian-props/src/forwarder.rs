//! Reliable update forwarding, producer side
//!
//! [`UpdateForwarder`] turns a stream of property changes into sealed,
//! sequence-numbered [`UpdateBatch`]es and keeps every batch in an
//! in-flight table until the collector acknowledges it. Batches are
//! replayed verbatim after a reconnect; the collector's registration
//! reply carries its last-seen sequence number and prunes everything at
//! or below it.
//!
//! The forwarder is lossy under sustained collector unavailability: when
//! the in-flight table hits its ceiling, newly sealed updates are
//! dropped instead of blocking producers. A dropped buffer never
//! consumes a sequence number, so the assigned sequence stays gapless.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use meridian_core::{ProducerId, PropertyValue};
use meridian_wire::{RegisterReply, RegisterRequest, UpdateBatch};

/// Forwarder tunables
#[derive(Clone, Copy, Debug)]
pub struct ForwarderConfig {
    /// Seal the buffer once it holds this many updates
    pub max_batch_updates: usize,
    /// Seal the buffer once its encoded records reach this many bytes
    pub max_batch_bytes: usize,
    /// In-flight ceiling; sealing beyond it drops the buffer
    pub max_in_flight: usize,
    /// Heartbeat period for [`UpdateForwarder::tick`]
    pub heartbeat: Duration,
    /// Oldest unacknowledged batches retransmitted per tick
    pub max_retransmit_per_tick: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        ForwarderConfig {
            max_batch_updates: 32,
            max_batch_bytes: 4096,
            max_in_flight: 256,
            heartbeat: Duration::from_secs(1),
            max_retransmit_per_tick: 10,
        }
    }
}

/// Batching, sequencing, retransmitting producer endpoint
pub struct UpdateForwarder {
    producer_id: ProducerId,
    config: ForwarderConfig,
    /// Last assigned sequence number; assignment is gapless
    last_seq: u32,
    buffer: Vec<(String, PropertyValue)>,
    buffer_bytes: usize,
    in_flight: BTreeMap<u32, UpdateBatch>,
    registered: bool,
    dropped: u64,
}

impl UpdateForwarder {
    pub fn new(producer_id: ProducerId, config: ForwarderConfig) -> Self {
        UpdateForwarder {
            producer_id,
            config,
            last_seq: 0,
            buffer: Vec::new(),
            buffer_bytes: 0,
            in_flight: BTreeMap::new(),
            registered: false,
            dropped: 0,
        }
    }

    pub fn producer_id(&self) -> ProducerId {
        self.producer_id
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Updates lost to the overflow policy
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn last_seq(&self) -> u32 {
        self.last_seq
    }

    /// Buffer one change; returns a batch to transmit when the buffer
    /// sealed and the collector is reachable
    pub fn push(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<UpdateBatch> {
        let name = name.into();
        self.buffer_bytes += 4 + name.len() + value.encode().len();
        self.buffer.push((name, value));

        if self.buffer.len() >= self.config.max_batch_updates
            || self.buffer_bytes >= self.config.max_batch_bytes
        {
            let sealed = self.seal();
            if self.registered {
                return sealed;
            }
        }
        None
    }

    /// Seal whatever is buffered; returns the batch to transmit when
    /// the collector is reachable
    pub fn flush(&mut self) -> Option<UpdateBatch> {
        let sealed = self.seal();
        if self.registered {
            sealed
        } else {
            None
        }
    }

    /// The registration request to send when the collector link comes up
    pub fn register_request(&self) -> RegisterRequest {
        RegisterRequest::new(self.producer_id)
    }

    /// Collector confirmed registration: prune what it already saw and
    /// resend the oldest of what it did not
    pub fn on_registered(&mut self, reply: &RegisterReply) -> Vec<UpdateBatch> {
        if reply.producer_id != self.producer_id {
            warn!(
                producer = %self.producer_id,
                got = %reply.producer_id,
                "registration reply for another producer; dropped"
            );
            return Vec::new();
        }
        self.registered = true;
        let confirmed = reply.last_seq_nr;
        let before = self.in_flight.len();
        self.in_flight.retain(|seq, _| *seq > confirmed);
        debug!(
            producer = %self.producer_id,
            confirmed,
            pruned = before - self.in_flight.len(),
            retained = self.in_flight.len(),
            "resynchronized with collector"
        );
        self.retransmit_slice()
    }

    /// One batch left the in-flight table; out-of-order acks are fine
    pub fn on_ack(&mut self, seq_nr: u32) -> bool {
        match self.in_flight.remove(&seq_nr) {
            Some(_) => true,
            None => {
                debug!(producer = %self.producer_id, seq_nr, "ack for unknown batch");
                false
            }
        }
    }

    /// The collector link dropped; batches stay in flight for replay
    pub fn on_disconnected(&mut self) {
        self.registered = false;
    }

    /// Heartbeat: seal any partial buffer, then retransmit a bounded
    /// number of the oldest unacknowledged batches
    pub fn tick(&mut self) -> Vec<UpdateBatch> {
        self.seal();
        if !self.registered {
            return Vec::new();
        }
        self.retransmit_slice()
    }

    fn retransmit_slice(&self) -> Vec<UpdateBatch> {
        self.in_flight
            .values()
            .take(self.config.max_retransmit_per_tick)
            .cloned()
            .collect()
    }

    fn seal(&mut self) -> Option<UpdateBatch> {
        if self.buffer.is_empty() {
            return None;
        }
        if self.in_flight.len() >= self.config.max_in_flight {
            // Lossy overflow: drop the buffer without assigning a
            // sequence number.
            let lost = self.buffer.len() as u64;
            self.dropped += lost;
            self.buffer.clear();
            self.buffer_bytes = 0;
            warn!(
                producer = %self.producer_id,
                lost,
                in_flight = self.in_flight.len(),
                "in-flight ceiling reached; updates dropped"
            );
            return None;
        }

        self.last_seq += 1;
        let mut batch = UpdateBatch::new(self.last_seq, self.producer_id);
        batch.updates = std::mem::take(&mut self.buffer);
        self.buffer_bytes = 0;
        self.in_flight.insert(batch.seq_nr, batch.clone());
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(config: ForwarderConfig) -> UpdateForwarder {
        UpdateForwarder::new(ProducerId::new(11), config)
    }

    fn registered_forwarder(config: ForwarderConfig) -> UpdateForwarder {
        let mut fwd = forwarder(config);
        let reply = RegisterReply::new(ProducerId::new(11), 0);
        assert!(fwd.on_registered(&reply).is_empty());
        fwd
    }

    fn push_n(fwd: &mut UpdateForwarder, n: usize) -> Vec<UpdateBatch> {
        let mut sealed = Vec::new();
        for i in 0..n {
            if let Some(batch) = fwd.push(format!("p{}", i), PropertyValue::Int(i as i64)) {
                sealed.push(batch);
            }
        }
        sealed
    }

    #[test]
    fn test_count_threshold_seals_batches() {
        let config = ForwarderConfig {
            max_batch_updates: 10,
            ..ForwarderConfig::default()
        };
        let mut fwd = registered_forwarder(config);

        // 25 updates: two full batches seal on push, the remainder on tick
        let sealed = push_n(&mut fwd, 25);
        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed[0].seq_nr, 1);
        assert_eq!(sealed[0].updates.len(), 10);
        assert_eq!(sealed[1].seq_nr, 2);
        assert_eq!(sealed[1].updates.len(), 10);
        assert_eq!(fwd.buffered(), 5);

        let out = fwd.tick();
        let seqs: Vec<u32> = out.iter().map(|b| b.seq_nr).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(out[2].updates.len(), 5);
        assert_eq!(fwd.buffered(), 0);
    }

    #[test]
    fn test_byte_threshold_seals_batches() {
        let config = ForwarderConfig {
            max_batch_bytes: 32,
            ..ForwarderConfig::default()
        };
        let mut fwd = registered_forwarder(config);

        let batch = fwd.push("a-rather-long-property-name", PropertyValue::Text("xxxx".into()));
        let batch = batch.expect("byte threshold should seal");
        assert_eq!(batch.seq_nr, 1);
        assert_eq!(batch.updates.len(), 1);
    }

    #[test]
    fn test_resync_prunes_confirmed_and_resends_rest() {
        let mut fwd = registered_forwarder(ForwarderConfig::default());

        for _ in 0..5 {
            fwd.push("p", PropertyValue::Bool(true));
            fwd.flush();
        }
        assert_eq!(fwd.last_seq(), 5);
        assert!(fwd.on_ack(1));
        assert!(fwd.on_ack(2));
        assert!(fwd.on_ack(3));
        assert_eq!(fwd.in_flight_len(), 2);

        // collector restarts having persisted through batch 4
        fwd.on_disconnected();
        assert!(fwd.tick().is_empty());

        let reply = RegisterReply::new(ProducerId::new(11), 4);
        let resent = fwd.on_registered(&reply);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].seq_nr, 5);
        assert_eq!(fwd.in_flight_len(), 1);
    }

    #[test]
    fn test_overflow_drops_without_consuming_sequence() {
        let config = ForwarderConfig {
            max_in_flight: 2,
            ..ForwarderConfig::default()
        };
        let mut fwd = registered_forwarder(config);

        fwd.push("a", PropertyValue::Int(1));
        fwd.flush();
        fwd.push("b", PropertyValue::Int(2));
        fwd.flush();
        assert_eq!(fwd.last_seq(), 2);

        // table is at the ceiling; this buffer is lost, not blocked
        fwd.push("c", PropertyValue::Int(3));
        assert!(fwd.flush().is_none());
        assert_eq!(fwd.dropped(), 1);
        assert_eq!(fwd.last_seq(), 2);

        // once an ack frees a slot the next seal continues gaplessly
        fwd.on_ack(1);
        fwd.push("d", PropertyValue::Int(4));
        let batch = fwd.flush().unwrap();
        assert_eq!(batch.seq_nr, 3);
    }

    #[test]
    fn test_unregistered_forwarder_buffers_silently() {
        let config = ForwarderConfig {
            max_batch_updates: 2,
            ..ForwarderConfig::default()
        };
        let mut fwd = forwarder(config);

        let sealed = push_n(&mut fwd, 4);
        assert!(sealed.is_empty());
        // batches sealed into the table, waiting for registration
        assert_eq!(fwd.in_flight_len(), 2);
        assert!(fwd.tick().is_empty());

        let reply = RegisterReply::new(ProducerId::new(11), 0);
        let resent = fwd.on_registered(&reply);
        assert_eq!(resent.len(), 2);
    }

    #[test]
    fn test_out_of_order_acks_tolerated() {
        let mut fwd = registered_forwarder(ForwarderConfig::default());
        fwd.push("a", PropertyValue::Int(1));
        fwd.flush();
        fwd.push("b", PropertyValue::Int(2));
        fwd.flush();

        assert!(fwd.on_ack(2));
        assert!(fwd.on_ack(1));
        assert!(!fwd.on_ack(7));
        assert_eq!(fwd.in_flight_len(), 0);
    }

    #[test]
    fn test_retransmit_bounded_per_tick() {
        let config = ForwarderConfig {
            max_retransmit_per_tick: 10,
            ..ForwarderConfig::default()
        };
        let mut fwd = registered_forwarder(config);
        for _ in 0..15 {
            fwd.push("p", PropertyValue::Bool(false));
            fwd.flush();
        }

        let out = fwd.tick();
        assert_eq!(out.len(), 10);
        assert_eq!(out.first().map(|b| b.seq_nr), Some(1));
        assert_eq!(out.last().map(|b| b.seq_nr), Some(10));
    }
}
