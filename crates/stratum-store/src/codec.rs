//! Row encoding for the data cache.
//!
//! Length-prefixed little-endian encoding: a u16 column count, then one
//! tagged cell per column. Strings and byte cells carry a u32 length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use stratum_common::error::{StratumError, StratumResult};
use stratum_common::types::Value;

const TAG_NULL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_BYTES: u8 = 5;

/// Encodes a row's cells.
#[must_use]
pub fn encode_row(data: &[Value]) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + data.len() * 9);
    buf.put_u16_le(data.len() as u16);

    for value in data {
        match value {
            Value::Null => buf.put_u8(TAG_NULL),
            Value::Boolean(b) => {
                buf.put_u8(TAG_BOOLEAN);
                buf.put_u8(u8::from(*b));
            }
            Value::Integer(i) => {
                buf.put_u8(TAG_INTEGER);
                buf.put_i64_le(*i);
            }
            Value::Double(d) => {
                buf.put_u8(TAG_DOUBLE);
                buf.put_f64_le(*d);
            }
            Value::Text(s) => {
                buf.put_u8(TAG_TEXT);
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                buf.put_u8(TAG_BYTES);
                buf.put_u32_le(b.len() as u32);
                buf.put_slice(b);
            }
        }
    }

    buf.freeze()
}

/// Decodes a row encoded by [`encode_row`].
pub fn decode_row(mut buf: &[u8]) -> StratumResult<Vec<Value>> {
    if buf.remaining() < 2 {
        return Err(corrupt("missing column count"));
    }
    let count = buf.get_u16_le() as usize;
    let mut data = Vec::with_capacity(count);

    for _ in 0..count {
        if buf.remaining() < 1 {
            return Err(corrupt("missing cell tag"));
        }
        let value = match buf.get_u8() {
            TAG_NULL => Value::Null,
            TAG_BOOLEAN => {
                if buf.remaining() < 1 {
                    return Err(corrupt("truncated boolean"));
                }
                Value::Boolean(buf.get_u8() != 0)
            }
            TAG_INTEGER => {
                if buf.remaining() < 8 {
                    return Err(corrupt("truncated integer"));
                }
                Value::Integer(buf.get_i64_le())
            }
            TAG_DOUBLE => {
                if buf.remaining() < 8 {
                    return Err(corrupt("truncated double"));
                }
                Value::Double(buf.get_f64_le())
            }
            TAG_TEXT => {
                let bytes = read_blob(&mut buf)?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| corrupt("text cell is not UTF-8"))?;
                Value::Text(text)
            }
            TAG_BYTES => Value::Bytes(read_blob(&mut buf)?),
            tag => {
                return Err(corrupt(format!("unknown cell tag {tag}")));
            }
        };
        data.push(value);
    }

    Ok(data)
}

fn read_blob(buf: &mut &[u8]) -> StratumResult<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(corrupt("truncated length"));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(corrupt("truncated cell body"));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn corrupt(message: impl Into<String>) -> StratumError {
    StratumError::RowCorrupted {
        message: message.into(),
    }
}
