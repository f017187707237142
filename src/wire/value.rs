//! Self-describing binary packed format: the payload carried inside every
//! [`crate::wire::message::RawMessage`]. A message body is a single
//! top-level [`WireValue::Array`] whose first element is the command/event
//! tag (spec §3, §4.2).
//!
//! Layout (little-endian throughout):
//!
//! | tag  | type    | payload                                   |
//! |------|---------|-------------------------------------------|
//! | 0x00 | uint    | 8 bytes, u64                               |
//! | 0x01 | int     | 8 bytes, i64                                |
//! | 0x02 | string  | 4-byte u32 length, then that many UTF-8 bytes |
//! | 0x03 | bool    | 1 byte, 0 or 1                              |
//! | 0x04 | array   | 4-byte u32 count, then that many values     |

use crate::error::{Error, Result};
use crate::wire::message::BUF_SIZE;

const TAG_UINT: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_BOOL: u8 = 0x03;
const TAG_ARRAY: u8 = 0x04;

#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    UInt(u64),
    Int(i64),
    Str(String),
    Bool(bool),
    Array(Vec<WireValue>),
}

impl WireValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(v) => Some(*v),
            WireValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            WireValue::UInt(v) => {
                buf.push(TAG_UINT);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            WireValue::Int(v) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            WireValue::Str(s) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            WireValue::Bool(b) => {
                buf.push(TAG_BOOL);
                buf.push(*b as u8);
            }
            WireValue::Array(items) => {
                buf.push(TAG_ARRAY);
                buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.write(buf);
                }
            }
        }
    }
}

/// A small byte cursor, avoiding a dependency on a parser-combinator crate
/// for a format this small.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| Error::MalformedEvent("truncated value".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_value(&mut self) -> Result<WireValue> {
        let tag = self.take_u8()?;
        match tag {
            TAG_UINT => {
                let bytes = self.take(8)?;
                Ok(WireValue::UInt(u64::from_le_bytes(bytes.try_into().unwrap())))
            }
            TAG_INT => {
                let bytes = self.take(8)?;
                Ok(WireValue::Int(i64::from_le_bytes(bytes.try_into().unwrap())))
            }
            TAG_STRING => {
                let len = self.take_u32()? as usize;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| Error::MalformedEvent(format!("non-utf8 string: {}", e)))?;
                Ok(WireValue::Str(s.to_owned()))
            }
            TAG_BOOL => {
                let b = self.take_u8()?;
                Ok(WireValue::Bool(b != 0))
            }
            TAG_ARRAY => {
                let len = self.take_u32()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                Ok(WireValue::Array(items))
            }
            other => Err(Error::MalformedEvent(format!("unknown type tag 0x{:02x}", other))),
        }
    }
}

/// Serialize a command tuple (`[op, args...]`) into a message body, enforcing
/// the per-message byte cap. The caller hands the result to
/// [`crate::transport`]; the padding to exactly `BUF_SIZE` happens there.
pub fn encode(tuple: &[WireValue]) -> Result<Vec<u8>> {
    let value = WireValue::Array(tuple.to_vec());
    let mut buf = Vec::new();
    value.write(&mut buf);
    if buf.len() > BUF_SIZE {
        return Err(Error::CommandTooLarge {
            len: buf.len(),
            cap: BUF_SIZE,
        });
    }
    Ok(buf)
}

/// Parse the first complete packed value out of a buffer, ignoring any
/// trailing zero padding (spec §4.2: "discard any trailing padding").
pub fn decode(buf: &[u8]) -> Result<WireValue> {
    let mut cursor = Cursor::new(buf);
    cursor.read_value()
}
