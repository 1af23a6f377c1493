//! Property distribution
//!
//! Everything a station needs to publish telemetry reliably:
//!
//! - [`PropertySet`]: a named bag of typed properties with the
//!   two-phase load/link handshake against the directory
//! - [`Directory`] and [`DirectoryTask`]: the per-namespace scope
//!   registry and the task serving it
//! - [`UpdateForwarder`]: batching, sequencing, and bounded
//!   retransmission of property changes toward one collector
//! - [`Collector`] and [`CollectorTask`]: the authoritative upstream
//!   store with idempotent acknowledgment
//! - [`ProducerTask`]: the daemon shell that runs a set and its
//!   forwarder on the reactor
//!
//! Delivery is at-least-once with per-producer sequence numbers; the
//! collector deduplicates, so producers may retransmit freely. Under
//! sustained collector unavailability the forwarder drops the oldest
//! excess instead of blocking its producers.

pub mod collector;
pub mod directory;
pub mod forwarder;
pub mod producer;
pub mod set;

pub use collector::{Collector, CollectorTask, SharedCollector, COLLECTOR_PORT};
pub use directory::{Directory, DirectoryTask, SharedDirectory, DIRECTORY_PORT};
pub use forwarder::{ForwarderConfig, UpdateForwarder};
pub use producer::{ProducerTask, Sampler};
pub use set::{LinkCompletion, LinkStart, PropertySet, SetState};
