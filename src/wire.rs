//! Minimal reader for the protobuf-style wire format used by the `BytesExtra` column.
//!
//! Every read takes the buffer and a cursor and hands back the advanced cursor, so a
//! caller can stop cleanly at the end of a field without relying on errors for control
//! flow. Errors are reserved for input that is actually malformed.

use thiserror::Error;

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_FIXED32: u8 = 5;

/// Longest legal encoding of a `u64` varint.
const MAX_VARINT_LEN: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated input at offset {offset}")]
    Truncated { offset: usize },

    #[error("varint at offset {offset} exceeds 64 bits")]
    VarintOverflow { offset: usize },

    #[error("unsupported wire type {wire_type} at offset {offset}")]
    UnsupportedWireType { wire_type: u8, offset: usize },
}

/// A decoded field key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub field: u64,
    pub wire_type: u8,
}

/// Decode one base-128 varint starting at `pos`.
pub fn read_varint(buf: &[u8], pos: usize) -> Result<(u64, usize), WireError> {
    let start = pos;
    let mut value = 0u64;
    let mut cursor = pos;

    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = buf.get(cursor) else {
            return Err(WireError::Truncated { offset: cursor });
        };
        cursor += 1;
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, cursor));
        }
    }

    Err(WireError::VarintOverflow { offset: start })
}

pub fn read_tag(buf: &[u8], pos: usize) -> Result<(Tag, usize), WireError> {
    let (raw, pos) = read_varint(buf, pos)?;
    let tag = Tag {
        field: raw >> 3,
        wire_type: (raw & 7) as u8,
    };
    Ok((tag, pos))
}

/// Read a varint length followed by that many bytes.
pub fn read_length_delimited(buf: &[u8], pos: usize) -> Result<(&[u8], usize), WireError> {
    let (len, body_start) = read_varint(buf, pos)?;
    let end = advance(buf, body_start, len)?;
    Ok((&buf[body_start..end], end))
}

/// Move the cursor past one field body of the given wire type.
pub fn skip_field(wire_type: u8, buf: &[u8], pos: usize) -> Result<usize, WireError> {
    match wire_type {
        WIRE_VARINT => read_varint(buf, pos).map(|(_, next)| next),
        WIRE_FIXED64 => advance(buf, pos, 8),
        WIRE_LEN => read_length_delimited(buf, pos).map(|(_, next)| next),
        WIRE_FIXED32 => advance(buf, pos, 4),
        other => Err(WireError::UnsupportedWireType {
            wire_type: other,
            offset: pos,
        }),
    }
}

fn advance(buf: &[u8], pos: usize, len: u64) -> Result<usize, WireError> {
    usize::try_from(len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|&end| end <= buf.len())
        .ok_or(WireError::Truncated { offset: buf.len() })
}

#[cfg(test)]
pub(crate) fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
