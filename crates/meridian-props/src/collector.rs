//! Reliable update forwarding, collector side
//!
//! The collector is the authoritative upstream end of the forwarding
//! protocol: it keeps the latest value per qualified property name and
//! the last-seen sequence number per producer. Duplicate batches after
//! a reconnect are acknowledged again but never re-applied, so
//! acknowledgment is idempotent by construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use meridian_core::{Event, ForwardSignal, ProducerId, PropertyValue, ProtocolId, Signal};
use meridian_runtime::{Flow, PortSpec, TaskContext, TaskEvent, TaskHandler, TaskSpec};
use meridian_wire::{RegisterReply, RegisterRequest, UpdateAck, UpdateBatch};

/// Listener port name collector tasks bind
pub const COLLECTOR_PORT: &str = "collector";

/// Authoritative value store and per-producer sequence tracking
#[derive(Debug, Default)]
pub struct Collector {
    producers: BTreeMap<ProducerId, u32>,
    values: BTreeMap<String, PropertyValue>,
    applied: u64,
    duplicates: u64,
}

impl Collector {
    pub fn new() -> Self {
        Collector::default()
    }

    /// Answer a producer registration with the last sequence number
    /// this collector has applied for it
    pub fn on_register(&mut self, request: &RegisterRequest) -> RegisterReply {
        let last = *self.producers.entry(request.producer_id).or_insert(0);
        debug!(producer = %request.producer_id, last, "producer registered");
        RegisterReply::new(request.producer_id, last)
    }

    /// Apply one batch; duplicates are acknowledged but not re-applied
    pub fn on_batch(&mut self, batch: &UpdateBatch) -> UpdateAck {
        let last = self.producers.entry(batch.producer_id).or_insert(0);
        if batch.seq_nr <= *last {
            self.duplicates += 1;
            debug!(
                producer = %batch.producer_id,
                seq_nr = batch.seq_nr,
                last = *last,
                "duplicate batch; ack only"
            );
        } else {
            *last = batch.seq_nr;
            for (name, value) in &batch.updates {
                self.values.insert(name.clone(), value.clone());
            }
            self.applied += 1;
        }
        UpdateAck::new(batch.seq_nr)
    }

    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// Stored values in name order
    pub fn values(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn last_seq(&self, producer: ProducerId) -> u32 {
        self.producers.get(&producer).copied().unwrap_or(0)
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

/// Cloneable handle on a collector store
#[derive(Clone, Default)]
pub struct SharedCollector(Arc<Mutex<Collector>>);

impl SharedCollector {
    pub fn new() -> Self {
        SharedCollector::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Collector> {
        self.0.lock()
    }
}

/// Reactor shell serving the forwarding protocol
pub struct CollectorTask {
    collector: SharedCollector,
}

impl CollectorTask {
    pub fn new(collector: SharedCollector) -> Self {
        CollectorTask { collector }
    }

    /// Task spec with the collector listener
    pub fn spec(task: impl Into<String>) -> TaskSpec {
        TaskSpec::new(task).port(PortSpec::listen(COLLECTOR_PORT, ProtocolId::Forward))
    }
}

impl TaskHandler for CollectorTask {
    fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
        let TaskEvent::Received { port, event } = event else {
            return Flow::Continue;
        };
        let Signal::Forward(signal) = event.signal else {
            return Flow::Continue;
        };
        match signal {
            ForwardSignal::Register => match RegisterRequest::decode(&event.payload) {
                Ok(request) => {
                    let reply = self.collector.lock().on_register(&request);
                    ctx.reply(
                        port,
                        event.seq_nr,
                        Event::with_payload(
                            Signal::Forward(ForwardSignal::Registered),
                            reply.encode(),
                        ),
                    );
                }
                Err(e) => {
                    warn!(%port, error = %e, "malformed producer registration; dropped");
                }
            },
            ForwardSignal::Update => match UpdateBatch::decode(&event.payload) {
                Ok(batch) => {
                    let ack = self.collector.lock().on_batch(&batch);
                    ctx.send(
                        port,
                        Event::with_payload(Signal::Forward(ForwardSignal::Ack), ack.encode()),
                    );
                }
                Err(e) => {
                    warn!(%port, error = %e, "malformed update batch; dropped");
                }
            },
            other => {
                warn!(signal = ?other, %port, "signal not served by the collector; dropped");
            }
        }
        Flow::Continue
    }
}
