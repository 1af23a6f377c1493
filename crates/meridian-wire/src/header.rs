//! Fixed frame header
//!
//! Every frame starts with an 8-byte header, network byte order:
//! - Bytes 0-1: signal code (BE)
//! - Bytes 2-3: sequence number (BE, 0 = no reply expected)
//! - Bytes 4-7: total frame length including this header (BE)
//!
//! The length field counts the header itself, so the smallest legal
//! value is 8 (a pure signal with an empty payload).

use meridian_core::{MeridianError, MeridianResult};

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum total frame size accepted on encode and decode
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Fixed frame header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Packed signal code (validated against the signal table by the
    /// frame layer, not here)
    pub signal: u16,
    /// Correlation sequence number
    pub seq_nr: u16,
    /// Total frame length, header included
    pub length: u32,
}

impl FrameHeader {
    pub fn new(signal: u16, seq_nr: u16, payload_len: usize) -> Self {
        FrameHeader {
            signal,
            seq_nr,
            length: (FRAME_HEADER_SIZE + payload_len) as u32,
        }
    }

    /// Payload length implied by the length field
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.length as usize - FRAME_HEADER_SIZE
    }

    /// Parse a header from the first 8 bytes of `buf`
    pub fn parse(buf: &[u8]) -> MeridianResult<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(MeridianError::BufferTooShort {
                expected: FRAME_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        // Bytes 0-1: signal
        let signal = u16::from_be_bytes([buf[0], buf[1]]);

        // Bytes 2-3: seqNr
        let seq_nr = u16::from_be_bytes([buf[2], buf[3]]);

        // Bytes 4-7: total length
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if (length as usize) < FRAME_HEADER_SIZE {
            return Err(MeridianError::InvalidWireFormat(format!(
                "frame length {} below header size",
                length
            )));
        }
        if length as usize > MAX_FRAME_SIZE {
            return Err(MeridianError::FrameTooLarge {
                size: length as usize,
                limit: MAX_FRAME_SIZE,
            });
        }

        Ok(FrameHeader {
            signal,
            seq_nr,
            length,
        })
    }

    /// Serialize into a fixed 8-byte array
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];

        // Bytes 0-1: signal
        buf[0..2].copy_from_slice(&self.signal.to_be_bytes());

        // Bytes 2-3: seqNr
        buf[2..4].copy_from_slice(&self.seq_nr.to_be_bytes());

        // Bytes 4-7: total length
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());

        buf
    }
}
