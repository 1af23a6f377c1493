//! Event definitions
//!
//! Events are the unit of communication between tasks: a decoded signal,
//! a correlation sequence number, and an opaque payload. An event is
//! immutable once constructed; the dispatcher owns it until delivery,
//! after which the handler does.

use bytes::Bytes;

use crate::Signal;

/// A typed event
///
/// `seq_nr` is 0 for fire-and-forget events and non-zero when the sender
/// expects a matching reply with automatic timeout tracking. Sequence
/// numbers are assigned by the sending port, never by handler code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub signal: Signal,
    pub seq_nr: u16,
    pub payload: Bytes,
}

impl Event {
    /// A bare event: no payload, no reply expected
    pub fn new(signal: Signal) -> Self {
        Event {
            signal,
            seq_nr: 0,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(signal: Signal, payload: impl Into<Bytes>) -> Self {
        Event {
            signal,
            seq_nr: 0,
            payload: payload.into(),
        }
    }

    /// Set the correlation sequence number
    pub fn with_seq(mut self, seq_nr: u16) -> Self {
        self.seq_nr = seq_nr;
        self
    }

    /// Does the sender expect a matching reply?
    #[inline]
    pub fn expects_reply(&self) -> bool {
        self.seq_nr != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceSignal, ForwardSignal};

    #[test]
    fn test_bare_event() {
        let event = Event::new(Signal::Device(DeviceSignal::Claim));
        assert_eq!(event.seq_nr, 0);
        assert!(event.payload.is_empty());
        assert!(!event.expects_reply());
    }

    #[test]
    fn test_event_with_seq_expects_reply() {
        let event = Event::with_payload(Signal::Forward(ForwardSignal::Register), vec![1, 2, 3])
            .with_seq(7);
        assert_eq!(event.seq_nr, 7);
        assert!(event.expects_reply());
        assert_eq!(event.payload.as_ref(), &[1, 2, 3]);
    }
}
