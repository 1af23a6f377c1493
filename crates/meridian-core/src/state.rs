//! Lifecycle state enums
//!
//! State values for the two long-lived state machines: the logical-device
//! lifecycle and the port connection cycle. Transitions live with their
//! owners (meridian-device, meridian-runtime); this module only defines
//! the vocabulary and a few predicates.

use std::fmt;

/// Logical-device lifecycle state
///
/// Devices start in `Initial`, settle in `Idle` once their control port
/// is up, and persist in `Idle` across claim/release cycles. `GoingDown`
/// is the only exit and is reached from `Releasing` when the device
/// decides not to survive the release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Initial,
    Idle,
    Claiming,
    Claimed,
    Preparing,
    Suspended,
    Active,
    Releasing,
    GoingDown,
}

impl DeviceState {
    /// States that persist while awaiting the next command
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            DeviceState::Idle
                | DeviceState::Claimed
                | DeviceState::Suspended
                | DeviceState::Active
        )
    }

    /// States entered while waiting on child quorum or device work
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            DeviceState::Claiming | DeviceState::Preparing | DeviceState::Releasing
        )
    }

    pub fn is_operational(self) -> bool {
        self == DeviceState::Active
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Initial => "initial",
            DeviceState::Idle => "idle",
            DeviceState::Claiming => "claiming",
            DeviceState::Claimed => "claimed",
            DeviceState::Preparing => "preparing",
            DeviceState::Suspended => "suspended",
            DeviceState::Active => "active",
            DeviceState::Releasing => "releasing",
            DeviceState::GoingDown => "going-down",
        };
        write!(f, "{}", name)
    }
}

/// Port connection state
///
/// `Disconnected` is recoverable: the owning task schedules a retry and
/// the port comes back through `Connecting`. Only an explicit close
/// returns a port to `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PortState {
    #[default]
    Closed,
    Connecting,
    Connected,
    Disconnected,
}

impl PortState {
    pub fn is_connected(self) -> bool {
        self == PortState::Connected
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortState::Closed => "closed",
            PortState::Connecting => "connecting",
            PortState::Connected => "connected",
            PortState::Disconnected => "disconnected",
        };
        write!(f, "{}", name)
    }
}

/// Port kind, fixed at creation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Connects out to a provider; sends in-signals, receives out-signals
    Request,
    /// Accepted provider side; sends out-signals, receives in-signals
    Response,
    /// Provider-side notification endpoint; sends out-signals only
    Broadcast,
}

impl PortKind {
    /// May a port of this kind emit an event with the given direction?
    pub fn may_send(self, direction: crate::Direction) -> bool {
        match self {
            PortKind::Request => direction != crate::Direction::Out,
            PortKind::Response | PortKind::Broadcast => direction != crate::Direction::In,
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::Request => "request",
            PortKind::Response => "response",
            PortKind::Broadcast => "broadcast",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction;

    #[test]
    fn test_device_state_predicates() {
        assert!(DeviceState::Idle.is_stable());
        assert!(DeviceState::Active.is_stable());
        assert!(DeviceState::Claiming.is_transitional());
        assert!(!DeviceState::Initial.is_stable());
        assert!(!DeviceState::GoingDown.is_stable());
        assert!(DeviceState::Active.is_operational());
        assert!(!DeviceState::Suspended.is_operational());
    }

    #[test]
    fn test_send_direction_rules() {
        assert!(PortKind::Request.may_send(Direction::In));
        assert!(!PortKind::Request.may_send(Direction::Out));
        assert!(PortKind::Response.may_send(Direction::Out));
        assert!(!PortKind::Response.may_send(Direction::In));
        assert!(PortKind::Broadcast.may_send(Direction::Out));
        assert!(!PortKind::Broadcast.may_send(Direction::In));
        assert!(PortKind::Request.may_send(Direction::InOut));
        assert!(PortKind::Response.may_send(Direction::InOut));
    }

    #[test]
    fn test_default_states() {
        assert_eq!(DeviceState::default(), DeviceState::Initial);
        assert_eq!(PortState::default(), PortState::Closed);
    }
}
