//! Payload codecs for the control protocols
//!
//! Layouts (all integers big-endian):
//! - Scope request: `{scopeLen: u16, scope: utf8}`
//! - Result reply: `{result: u8}` (device lifecycle and scope replies)
//! - Link request: `{scopeLen: u16, scope, nameCount: u16, names...}`
//! - Link reply: `{result: u8, missing: u16}`
//! - Forwarder register: `{producerId: u32}`
//! - Forwarder registered: `{producerId: u32, lastSeqNr: u32}`
//! - Update batch: `{seqNr: u32, producerId: u32, updateCount: u16}`
//!   followed by `(nameLen: u16, name, valueLen: u16, value)` records
//! - Update ack: `{seqNr: u32}`
//!
//! Decoding is strict: truncated input and trailing bytes are both
//! rejected, so a malformed frame never half-applies.

use meridian_core::{MeridianError, MeridianResult, ProducerId, PropertyValue, ResultCode};

fn take_u8(buf: &[u8], offset: &mut usize) -> MeridianResult<u8> {
    let Some(b) = buf.get(*offset) else {
        return Err(MeridianError::BufferTooShort {
            expected: *offset + 1,
            actual: buf.len(),
        });
    };
    *offset += 1;
    Ok(*b)
}

fn take_u16(buf: &[u8], offset: &mut usize) -> MeridianResult<u16> {
    if buf.len() < *offset + 2 {
        return Err(MeridianError::BufferTooShort {
            expected: *offset + 2,
            actual: buf.len(),
        });
    }
    let v = u16::from_be_bytes([buf[*offset], buf[*offset + 1]]);
    *offset += 2;
    Ok(v)
}

fn take_u32(buf: &[u8], offset: &mut usize) -> MeridianResult<u32> {
    if buf.len() < *offset + 4 {
        return Err(MeridianError::BufferTooShort {
            expected: *offset + 4,
            actual: buf.len(),
        });
    }
    let v = u32::from_be_bytes([
        buf[*offset],
        buf[*offset + 1],
        buf[*offset + 2],
        buf[*offset + 3],
    ]);
    *offset += 4;
    Ok(v)
}

fn take_string(buf: &[u8], offset: &mut usize) -> MeridianResult<String> {
    let len = take_u16(buf, offset)? as usize;
    if buf.len() < *offset + len {
        return Err(MeridianError::BufferTooShort {
            expected: *offset + len,
            actual: buf.len(),
        });
    }
    let s = std::str::from_utf8(&buf[*offset..*offset + len])
        .map_err(|_| MeridianError::InvalidWireFormat("non-utf8 string".into()))?
        .to_string();
    *offset += len;
    Ok(s)
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn finish(buf: &[u8], offset: usize) -> MeridianResult<()> {
    if offset != buf.len() {
        return Err(MeridianError::InvalidWireFormat(format!(
            "{} trailing bytes after payload",
            buf.len() - offset
        )));
    }
    Ok(())
}

fn take_result_code(buf: &[u8], offset: &mut usize) -> MeridianResult<ResultCode> {
    let b = take_u8(buf, offset)?;
    ResultCode::from_byte(b).ok_or(MeridianError::UnknownResultCode(b))
}

/// Scope registration / unregistration request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeRequest {
    pub scope: String,
}

impl ScopeRequest {
    pub fn new(scope: impl Into<String>) -> Self {
        ScopeRequest {
            scope: scope.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.scope.len());
        put_string(&mut buf, &self.scope);
        buf
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let scope = take_string(buf, &mut offset)?;
        finish(buf, offset)?;
        Ok(ScopeRequest { scope })
    }
}

/// Bare result reply: scope confirmations and device lifecycle replies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResultReply {
    pub result: ResultCode,
}

impl ResultReply {
    pub fn new(result: ResultCode) -> Self {
        ResultReply { result }
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.result.to_byte()]
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let result = take_result_code(buf, &mut offset)?;
        finish(buf, offset)?;
        Ok(ResultReply { result })
    }
}

/// Property link / unlink request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRequest {
    pub scope: String,
    pub names: Vec<String>,
}

impl LinkRequest {
    pub fn new(scope: impl Into<String>, names: Vec<String>) -> Self {
        LinkRequest {
            scope: scope.into(),
            names,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, &self.scope);
        buf.extend_from_slice(&(self.names.len() as u16).to_be_bytes());
        for name in &self.names {
            put_string(&mut buf, name);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let scope = take_string(buf, &mut offset)?;
        let count = take_u16(buf, &mut offset)? as usize;
        let mut names = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            names.push(take_string(buf, &mut offset)?);
        }
        finish(buf, offset)?;
        Ok(LinkRequest { scope, names })
    }
}

/// Link / unlink completion reply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkReply {
    pub result: ResultCode,
    /// Number of requested properties not present in the set
    pub missing: u16,
}

impl LinkReply {
    pub fn new(result: ResultCode, missing: u16) -> Self {
        LinkReply { result, missing }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3);
        buf.push(self.result.to_byte());
        buf.extend_from_slice(&self.missing.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let result = take_result_code(buf, &mut offset)?;
        let missing = take_u16(buf, &mut offset)?;
        finish(buf, offset)?;
        Ok(LinkReply { result, missing })
    }
}

/// Forwarder registration request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterRequest {
    pub producer_id: ProducerId,
}

impl RegisterRequest {
    pub fn new(producer_id: ProducerId) -> Self {
        RegisterRequest { producer_id }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.producer_id.to_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let producer_id = ProducerId::new(take_u32(buf, &mut offset)?);
        finish(buf, offset)?;
        Ok(RegisterRequest { producer_id })
    }
}

/// Collector registration confirmation, the resynchronization point:
/// `last_seq_nr` is the highest batch the collector has already seen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterReply {
    pub producer_id: ProducerId,
    pub last_seq_nr: u32,
}

impl RegisterReply {
    pub fn new(producer_id: ProducerId, last_seq_nr: u32) -> Self {
        RegisterReply {
            producer_id,
            last_seq_nr,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.producer_id.to_bytes());
        buf.extend_from_slice(&self.last_seq_nr.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let producer_id = ProducerId::new(take_u32(buf, &mut offset)?);
        let last_seq_nr = take_u32(buf, &mut offset)?;
        finish(buf, offset)?;
        Ok(RegisterReply {
            producer_id,
            last_seq_nr,
        })
    }
}

/// A sealed batch of property updates
///
/// Batches are retained verbatim in the forwarder's in-flight table and
/// replayed with the same `seq_nr` after a reconnect, so the envelope is
/// the unit of both transmission and retention.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateBatch {
    pub seq_nr: u32,
    pub producer_id: ProducerId,
    pub updates: Vec<(String, PropertyValue)>,
}

impl UpdateBatch {
    pub fn new(seq_nr: u32, producer_id: ProducerId) -> Self {
        UpdateBatch {
            seq_nr,
            producer_id,
            updates: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.seq_nr.to_be_bytes());
        buf.extend_from_slice(&self.producer_id.to_bytes());
        buf.extend_from_slice(&(self.updates.len() as u16).to_be_bytes());
        for (name, value) in &self.updates {
            put_string(&mut buf, name);
            let encoded = value.encode();
            buf.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
            buf.extend_from_slice(&encoded);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let seq_nr = take_u32(buf, &mut offset)?;
        let producer_id = ProducerId::new(take_u32(buf, &mut offset)?);
        let count = take_u16(buf, &mut offset)? as usize;

        let mut updates = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let name = take_string(buf, &mut offset)?;
            let value_len = take_u16(buf, &mut offset)? as usize;
            if buf.len() < offset + value_len {
                return Err(MeridianError::BufferTooShort {
                    expected: offset + value_len,
                    actual: buf.len(),
                });
            }
            let (value, used) = PropertyValue::decode(&buf[offset..offset + value_len])
                .ok_or_else(|| {
                    MeridianError::InvalidWireFormat(format!("bad value for update {:?}", name))
                })?;
            if used != value_len {
                return Err(MeridianError::InvalidWireFormat(format!(
                    "value length mismatch for update {:?}",
                    name
                )));
            }
            offset += value_len;
            updates.push((name, value));
        }
        finish(buf, offset)?;

        Ok(UpdateBatch {
            seq_nr,
            producer_id,
            updates,
        })
    }

    /// Encoded size of the records, used against the batch byte threshold
    pub fn payload_size(&self) -> usize {
        self.updates
            .iter()
            .map(|(name, value)| 4 + name.len() + value.encode().len())
            .sum()
    }
}

/// Collector acknowledgment for one batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateAck {
    pub seq_nr: u32,
}

impl UpdateAck {
    pub fn new(seq_nr: u32) -> Self {
        UpdateAck { seq_nr }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.seq_nr.to_be_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> MeridianResult<Self> {
        let mut offset = 0;
        let seq_nr = take_u32(buf, &mut offset)?;
        finish(buf, offset)?;
        Ok(UpdateAck { seq_nr })
    }
}
