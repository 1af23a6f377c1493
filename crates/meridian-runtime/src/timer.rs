//! Reactor timers
//!
//! Timers fire into the task mailbox like any other message, so handler
//! code never races its own timer callbacks. Cancellation is a table
//! membership check: a fire for an id no longer in the table is stale
//! and silently dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use meridian_core::{PortId, TimerId};

use crate::task::TaskMessage;

#[derive(Clone, Copy, Debug)]
pub(crate) enum TimerPurpose {
    /// Handler-requested timer surfaced as `TaskEvent::Timer`
    User { token: u64 },
    /// Deadline for one outstanding request
    RequestExpiry { port: PortId, seq_nr: u16 },
}

struct TimerEntry {
    purpose: TimerPurpose,
    cancel: CancellationToken,
    periodic: bool,
}

#[derive(Default)]
pub(crate) struct TimerTable {
    next: u64,
    entries: HashMap<TimerId, TimerEntry>,
}

impl TimerTable {
    pub(crate) fn new() -> Self {
        TimerTable::default()
    }

    pub(crate) fn arm(
        &mut self,
        after: Duration,
        periodic: bool,
        purpose: TimerPurpose,
        mailbox: mpsc::Sender<TaskMessage>,
        parent: &CancellationToken,
    ) -> TimerId {
        self.next += 1;
        let id = TimerId::new(self.next);
        let cancel = parent.child_token();

        let token = cancel.clone();
        tokio::spawn(async move {
            if periodic {
                let start = tokio::time::Instant::now() + after;
                let mut interval = tokio::time::interval_at(start, after);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = interval.tick() => {
                            if mailbox.send(TaskMessage::TimerFired { id }).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            } else {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(after) => {
                        let _ = mailbox.send(TaskMessage::TimerFired { id }).await;
                    }
                }
            }
        });

        self.entries.insert(
            id,
            TimerEntry {
                purpose,
                cancel,
                periodic,
            },
        );
        id
    }

    /// Resolve a fire notification; stale ids yield `None`. One-shot
    /// timers leave the table on their only fire.
    pub(crate) fn fired(&mut self, id: TimerId) -> Option<TimerPurpose> {
        let periodic = self.entries.get(&id)?.periodic;
        if periodic {
            Some(self.entries[&id].purpose)
        } else {
            self.entries.remove(&id).map(|entry| entry.purpose)
        }
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for entry in self.entries.values() {
            entry.cancel.cancel();
        }
        self.entries.clear();
    }
}
