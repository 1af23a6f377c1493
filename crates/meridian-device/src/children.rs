//! Child roster and quorum accounting
//!
//! A logical device tracks each child by name: whether its port is up
//! and the last lifecycle state the child confirmed. Quorum questions
//! ("have enough children reached Claimed?") are answered here so the
//! state machine in [`crate::device`] stays free of counting code.

use std::collections::BTreeMap;

use meridian_core::DeviceState;

/// Per-child link and lifecycle bookkeeping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildLink {
    pub connected: bool,
    pub state: DeviceState,
}

impl Default for ChildLink {
    fn default() -> Self {
        ChildLink {
            connected: false,
            state: DeviceState::Idle,
        }
    }
}

/// The set of children a device aggregates over
///
/// Membership is fixed at construction; connectivity and confirmed state
/// change as reports come in. A child that drops its link reverts to
/// `Idle`: whatever state it held is gone with the session, and it walks
/// the ladder again after reconnecting.
#[derive(Debug, Default)]
pub struct ChildSet {
    children: BTreeMap<String, ChildLink>,
}

impl ChildSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let children = names
            .into_iter()
            .map(|name| (name.into(), ChildLink::default()))
            .collect();
        ChildSet { children }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn state_of(&self, name: &str) -> Option<DeviceState> {
        self.children.get(name).map(|link| link.state)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(|name| name.as_str())
    }

    /// Names of children whose ports are currently up
    pub fn connected(&self) -> impl Iterator<Item = &str> {
        self.children
            .iter()
            .filter(|(_, link)| link.connected)
            .map(|(name, _)| name.as_str())
    }

    /// Record a child port coming up; unknown names are ignored
    pub fn mark_up(&mut self, name: &str) -> bool {
        match self.children.get_mut(name) {
            Some(link) => {
                link.connected = true;
                link.state = DeviceState::Idle;
                true
            }
            None => false,
        }
    }

    /// Record a child port going down; the confirmed state resets to `Idle`
    pub fn mark_down(&mut self, name: &str) -> bool {
        match self.children.get_mut(name) {
            Some(link) => {
                link.connected = false;
                link.state = DeviceState::Idle;
                true
            }
            None => false,
        }
    }

    /// Record a state the child has confirmed reaching
    pub fn record_state(&mut self, name: &str, state: DeviceState) -> bool {
        match self.children.get_mut(name) {
            Some(link) => {
                link.state = state;
                true
            }
            None => false,
        }
    }

    pub fn count_in(&self, state: DeviceState) -> usize {
        self.children
            .values()
            .filter(|link| link.state == state)
            .count()
    }

    /// Number of children that must confirm, for a quorum fraction
    ///
    /// Rounds up and clamps to the roster size, so `1.0` means every
    /// child and any fraction over zero means at least one.
    pub fn quorum_required(&self, quorum: f64) -> usize {
        let n = self.children.len();
        ((quorum * n as f64).ceil() as usize).min(n)
    }

    /// Has the quorum fraction of children confirmed `target`?
    ///
    /// An empty roster always passes: leaf devices gate on nothing.
    pub fn quorum_reached(&self, target: DeviceState, quorum: f64) -> bool {
        self.count_in(target) >= self.quorum_required(quorum)
    }
}
