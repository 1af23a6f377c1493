//! Whole-frame encode and decode
//!
//! A frame is the fixed header immediately followed by the payload. The
//! signal code is validated here, at the frame boundary: everything past
//! this point works with the decoded [`Signal`] sum type.
//!
//! Stream transports read in two steps (header, then exactly
//! `payload_len` bytes) and hand the pieces to [`decode_payload`];
//! datagram-style buffers go through [`decode_event`] whole.

use bytes::Bytes;

use meridian_core::{Event, MeridianError, MeridianResult, Signal};

use crate::{FrameHeader, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};

/// Encode an event into a wire frame
pub fn encode_event(event: &Event) -> MeridianResult<Vec<u8>> {
    let total = FRAME_HEADER_SIZE + event.payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(MeridianError::FrameTooLarge {
            size: total,
            limit: MAX_FRAME_SIZE,
        });
    }

    let header = FrameHeader::new(event.signal.pack(), event.seq_nr, event.payload.len());

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(&event.payload);
    Ok(buf)
}

/// Decode one complete frame; the buffer must contain exactly one frame
pub fn decode_event(buf: &[u8]) -> MeridianResult<Event> {
    let header = FrameHeader::parse(buf)?;

    if buf.len() != header.length as usize {
        return Err(MeridianError::InvalidWireFormat(format!(
            "frame length field {} does not match buffer length {}",
            header.length,
            buf.len()
        )));
    }

    decode_payload(&header, &buf[FRAME_HEADER_SIZE..])
}

/// Assemble an event from an already-parsed header and its payload bytes
pub fn decode_payload(header: &FrameHeader, payload: &[u8]) -> MeridianResult<Event> {
    if payload.len() != header.payload_len() {
        return Err(MeridianError::BufferTooShort {
            expected: header.payload_len(),
            actual: payload.len(),
        });
    }

    let signal =
        Signal::unpack(header.signal).ok_or(MeridianError::UnknownSignal(header.signal))?;

    Ok(Event {
        signal,
        seq_nr: header.seq_nr,
        payload: Bytes::copy_from_slice(payload),
    })
}
