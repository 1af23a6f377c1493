//! Task reactor configuration

use std::time::Duration;

/// Tuning knobs for one task reactor
#[derive(Clone, Debug)]
pub struct TaskConfig {
    /// Shortest delay before a dial port retries a dropped connection
    pub reconnect_floor: Duration,
    /// Longest delay before a dial port retries; the actual delay is
    /// drawn uniformly from the floor..=ceiling range so restarting
    /// controllers do not redial in lockstep
    pub reconnect_ceiling: Duration,
    /// How long a request may stay unanswered before it is failed back
    /// to the handler
    pub request_timeout: Duration,
    /// Outbound queue depth per port; sends beyond this are dropped
    pub send_queue_depth: usize,
    /// Reactor mailbox depth shared by all ports and timers of a task
    pub mailbox_depth: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            reconnect_floor: Duration::from_secs(1),
            reconnect_ceiling: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            send_queue_depth: 256,
            mailbox_depth: 1024,
        }
    }
}

impl TaskConfig {
    /// Tight timings for tests and in-process simulation
    pub fn fast() -> Self {
        TaskConfig {
            reconnect_floor: Duration::from_millis(50),
            reconnect_ceiling: Duration::from_millis(150),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }
}
