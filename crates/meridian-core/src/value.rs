//! Typed property values
//!
//! Properties carry one of five value kinds. The codec is a 1-byte tag
//! followed by a big-endian body; text and blob bodies are u16
//! length-prefixed, which also bounds a single value at 64 KiB.

use std::fmt;

/// A property value
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl PropertyValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Text(_) => "text",
            PropertyValue::Blob(_) => "blob",
        }
    }

    /// Encode for the wire
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            PropertyValue::Bool(v) => {
                buf.push(0x01);
                buf.push(u8::from(*v));
            }
            PropertyValue::Int(v) => {
                buf.push(0x02);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            PropertyValue::Float(v) => {
                buf.push(0x03);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            PropertyValue::Text(v) => {
                buf.push(0x04);
                buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
            PropertyValue::Blob(v) => {
                buf.push(0x05);
                buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
                buf.extend_from_slice(v);
            }
        }
        buf
    }

    /// Decode from the wire; returns the value and the bytes consumed
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.is_empty() {
            return None;
        }

        match buf[0] {
            0x01 => {
                if buf.len() < 2 {
                    return None;
                }
                Some((PropertyValue::Bool(buf[1] != 0), 2))
            }
            0x02 => {
                if buf.len() < 9 {
                    return None;
                }
                let v = i64::from_be_bytes(buf[1..9].try_into().ok()?);
                Some((PropertyValue::Int(v), 9))
            }
            0x03 => {
                if buf.len() < 9 {
                    return None;
                }
                let v = f64::from_be_bytes(buf[1..9].try_into().ok()?);
                Some((PropertyValue::Float(v), 9))
            }
            0x04 => {
                if buf.len() < 3 {
                    return None;
                }
                let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
                if buf.len() < 3 + len {
                    return None;
                }
                let text = String::from_utf8(buf[3..3 + len].to_vec()).ok()?;
                Some((PropertyValue::Text(text), 3 + len))
            }
            0x05 => {
                if buf.len() < 3 {
                    return None;
                }
                let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
                if buf.len() < 3 + len {
                    return None;
                }
                Some((PropertyValue::Blob(buf[3..3 + len].to_vec()), 3 + len))
            }
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(v) => write!(f, "{}", v),
            PropertyValue::Blob(v) => write!(f, "blob[{}]", v.len()),
        }
    }
}
