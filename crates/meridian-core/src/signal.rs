//! Signal definitions
//!
//! Every event carries a 16-bit signal code that packs three fields:
//!
//! - Bits 15-14: direction (1 = in, toward the protocol provider;
//!   2 = out, toward the requester; 3 = in/out)
//! - Bits 13-8: protocol id (device control, property directory,
//!   update forwarding; 0x01 is reserved for task-internal control
//!   events and never appears on the wire)
//! - Bits 7-0: signal id, meaning owned by the protocol
//!
//! The packed code exists only at the frame boundary. Decoding produces a
//! [`Signal`] sum type, so handler code matches on closed enums and never
//! range-checks raw integers.

use std::fmt;

use crate::DeviceState;

/// Signal direction relative to the protocol provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// Toward the provider (commands, requests, updates)
    In = 0b01,
    /// Toward the requester (replies, notifications, acks)
    Out = 0b10,
    /// Valid in both directions
    InOut = 0b11,
}

impl Direction {
    pub fn from_bits(b: u8) -> Option<Self> {
        match b {
            0b01 => Some(Direction::In),
            0b10 => Some(Direction::Out),
            0b11 => Some(Direction::InOut),
            _ => None,
        }
    }

    #[inline]
    pub fn to_bits(self) -> u8 {
        self as u8
    }
}

/// Protocol identifier (6 bits of the packed signal code)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// Logical-device lifecycle control
    Device = 0x02,
    /// Property directory (scope registration, linking)
    Directory = 0x03,
    /// Reliable update forwarding
    Forward = 0x04,
}

impl ProtocolId {
    pub fn from_bits(b: u8) -> Option<Self> {
        match b {
            0x02 => Some(ProtocolId::Device),
            0x03 => Some(ProtocolId::Directory),
            0x04 => Some(ProtocolId::Forward),
            _ => None,
        }
    }

    #[inline]
    pub fn to_bits(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolId::Device => "device",
            ProtocolId::Directory => "directory",
            ProtocolId::Forward => "forward",
        };
        write!(f, "{}", name)
    }
}

/// Logical-device lifecycle signals
///
/// Commands flow in toward the device; the matching past-tense
/// notification flows back out, carrying a result code in its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceSignal {
    Claim = 0x01,
    Claimed = 0x02,
    Prepare = 0x03,
    Prepared = 0x04,
    Resume = 0x05,
    Resumed = 0x06,
    Suspend = 0x07,
    Suspended = 0x08,
    Release = 0x09,
    Released = 0x0A,
}

impl DeviceSignal {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(DeviceSignal::Claim),
            0x02 => Some(DeviceSignal::Claimed),
            0x03 => Some(DeviceSignal::Prepare),
            0x04 => Some(DeviceSignal::Prepared),
            0x05 => Some(DeviceSignal::Resume),
            0x06 => Some(DeviceSignal::Resumed),
            0x07 => Some(DeviceSignal::Suspend),
            0x08 => Some(DeviceSignal::Suspended),
            0x09 => Some(DeviceSignal::Release),
            0x0A => Some(DeviceSignal::Released),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn direction(self) -> Direction {
        match self {
            DeviceSignal::Claim
            | DeviceSignal::Prepare
            | DeviceSignal::Resume
            | DeviceSignal::Suspend
            | DeviceSignal::Release => Direction::In,
            DeviceSignal::Claimed
            | DeviceSignal::Prepared
            | DeviceSignal::Resumed
            | DeviceSignal::Suspended
            | DeviceSignal::Released => Direction::Out,
        }
    }

    /// The notification a device emits once this command completes
    pub fn completion(self) -> Option<DeviceSignal> {
        match self {
            DeviceSignal::Claim => Some(DeviceSignal::Claimed),
            DeviceSignal::Prepare => Some(DeviceSignal::Prepared),
            DeviceSignal::Resume => Some(DeviceSignal::Resumed),
            DeviceSignal::Suspend => Some(DeviceSignal::Suspended),
            DeviceSignal::Release => Some(DeviceSignal::Released),
            _ => None,
        }
    }

    /// The child state implied by a successful completion notification
    ///
    /// `Prepared` reports `Suspended` (prepare parks the device), and
    /// `Released` reports `Idle` (the device survives release cycles).
    pub fn reported_state(self) -> Option<DeviceState> {
        match self {
            DeviceSignal::Claimed => Some(DeviceState::Claimed),
            DeviceSignal::Prepared => Some(DeviceState::Suspended),
            DeviceSignal::Resumed => Some(DeviceState::Active),
            DeviceSignal::Suspended => Some(DeviceState::Suspended),
            DeviceSignal::Released => Some(DeviceState::Idle),
            _ => None,
        }
    }
}

/// Property directory signals
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DirectorySignal {
    RegisterScope = 0x01,
    ScopeRegistered = 0x02,
    UnregisterScope = 0x03,
    ScopeUnregistered = 0x04,
    LinkProperties = 0x05,
    PropertiesLinked = 0x06,
    UnlinkProperties = 0x07,
    PropertiesUnlinked = 0x08,
}

impl DirectorySignal {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(DirectorySignal::RegisterScope),
            0x02 => Some(DirectorySignal::ScopeRegistered),
            0x03 => Some(DirectorySignal::UnregisterScope),
            0x04 => Some(DirectorySignal::ScopeUnregistered),
            0x05 => Some(DirectorySignal::LinkProperties),
            0x06 => Some(DirectorySignal::PropertiesLinked),
            0x07 => Some(DirectorySignal::UnlinkProperties),
            0x08 => Some(DirectorySignal::PropertiesUnlinked),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn direction(self) -> Direction {
        match self {
            DirectorySignal::RegisterScope
            | DirectorySignal::UnregisterScope
            | DirectorySignal::LinkProperties
            | DirectorySignal::UnlinkProperties => Direction::In,
            DirectorySignal::ScopeRegistered
            | DirectorySignal::ScopeUnregistered
            | DirectorySignal::PropertiesLinked
            | DirectorySignal::PropertiesUnlinked => Direction::Out,
        }
    }
}

/// Update-forwarding signals (producer to collector and back)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ForwardSignal {
    Register = 0x01,
    Registered = 0x02,
    Update = 0x03,
    Ack = 0x04,
}

impl ForwardSignal {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(ForwardSignal::Register),
            0x02 => Some(ForwardSignal::Registered),
            0x03 => Some(ForwardSignal::Update),
            0x04 => Some(ForwardSignal::Ack),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn direction(self) -> Direction {
        match self {
            ForwardSignal::Register | ForwardSignal::Update => Direction::In,
            ForwardSignal::Registered | ForwardSignal::Ack => Direction::Out,
        }
    }
}

/// A decoded signal: one variant per protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Device(DeviceSignal),
    Directory(DirectorySignal),
    Forward(ForwardSignal),
}

impl Signal {
    pub fn protocol(self) -> ProtocolId {
        match self {
            Signal::Device(_) => ProtocolId::Device,
            Signal::Directory(_) => ProtocolId::Directory,
            Signal::Forward(_) => ProtocolId::Forward,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Signal::Device(s) => s.direction(),
            Signal::Directory(s) => s.direction(),
            Signal::Forward(s) => s.direction(),
        }
    }

    fn code(self) -> u8 {
        match self {
            Signal::Device(s) => s.to_byte(),
            Signal::Directory(s) => s.to_byte(),
            Signal::Forward(s) => s.to_byte(),
        }
    }

    /// Pack into the 16-bit wire code
    pub fn pack(self) -> u16 {
        ((self.direction().to_bits() as u16) << 14)
            | ((self.protocol().to_bits() as u16) << 8)
            | self.code() as u16
    }

    /// Unpack a wire code; direction bits must match the signal's
    /// canonical direction or the code is rejected
    pub fn unpack(raw: u16) -> Option<Signal> {
        let direction = Direction::from_bits((raw >> 14) as u8)?;
        let protocol = ProtocolId::from_bits(((raw >> 8) & 0x3F) as u8)?;
        let code = raw as u8;

        let signal = match protocol {
            ProtocolId::Device => Signal::Device(DeviceSignal::from_byte(code)?),
            ProtocolId::Directory => Signal::Directory(DirectorySignal::from_byte(code)?),
            ProtocolId::Forward => Signal::Forward(ForwardSignal::from_byte(code)?),
        };

        if signal.direction() != direction {
            return None;
        }
        Some(signal)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Device(s) => write!(f, "device/{:?}", s),
            Signal::Directory(s) => write!(f, "directory/{:?}", s),
            Signal::Forward(s) => write!(f, "forward/{:?}", s),
        }
    }
}
