//! Result codes carried in reply payloads
//!
//! Handshake outcomes are values, not errors: `load()` answering `Busy`
//! or a directory answering `ScopeAlreadyExists` is a normal protocol
//! result the caller branches on. Transport and framing failures use
//! [`crate::MeridianError`] instead.

/// Outcome code carried by replies and completion reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ResultCode {
    #[default]
    NoError = 0x00,
    /// Aggregate quality fell below the configured threshold
    LowQuality = 0x01,
    /// A prior operation is still outstanding
    Busy = 0x02,
    AlreadyLoaded = 0x03,
    /// One or more requested properties do not exist in the set
    MissingProperties = 0x04,
    /// The target property set vanished mid-operation
    PropertySetGone = 0x05,
    ScopeAlreadyExists = 0x06,
    /// Named property is not in the set (local lookup, never on the wire)
    NotInSet = 0x07,
    TimedOut = 0x08,
}

impl ResultCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(ResultCode::NoError),
            0x01 => Some(ResultCode::LowQuality),
            0x02 => Some(ResultCode::Busy),
            0x03 => Some(ResultCode::AlreadyLoaded),
            0x04 => Some(ResultCode::MissingProperties),
            0x05 => Some(ResultCode::PropertySetGone),
            0x06 => Some(ResultCode::ScopeAlreadyExists),
            0x07 => Some(ResultCode::NotInSet),
            0x08 => Some(ResultCode::TimedOut),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == ResultCode::NoError
    }
}
