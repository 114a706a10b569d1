//! Decoding of the per-message `BytesExtra` side channel.
//!
//! The blob is a protobuf-like message. Top-level field 3 repeats a small record of
//! `{1: type id (varint), 2: value (string)}`; everything else is skipped. The type ids
//! the exporter cares about are listed as constants below.

use crate::wire::{self, WIRE_LEN, WireError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Originating member id of a group chat message.
pub const FIELD_MEMBER_ID: u64 = 1;
/// Thumbnail path of an image message.
pub const FIELD_THUMB_PATH: u64 = 3;
/// Primary media path (image, voice, video).
pub const FIELD_MEDIA_PATH: u64 = 4;

/// Typed key/value attachments recovered from a `BytesExtra` blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideChannelMap {
    items: BTreeMap<u64, String>,
}

impl SideChannelMap {
    pub fn get(&self, field: u64) -> Option<&str> {
        self.items.get(&field).map(String::as_str)
    }

    /// Like [`get`](Self::get), but treats an empty value as missing.
    pub fn non_empty(&self, field: u64) -> Option<&str> {
        self.get(field).filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn insert(&mut self, field: u64, value: impl Into<String>) {
        self.items.insert(field, value.into());
    }
}

/// A decode that stopped early. Holds whatever was recovered before the failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("BytesExtra decode stopped after {} item(s): {error}", .partial.len())]
pub struct PartialExtra {
    pub partial: SideChannelMap,
    #[source]
    pub error: WireError,
}

impl PartialExtra {
    /// Keep the partially decoded map, discarding the error.
    pub fn into_partial(self) -> SideChannelMap {
        self.partial
    }
}

pub fn parse_bytes_extra(blob: Option<&[u8]>) -> Result<SideChannelMap, PartialExtra> {
    let mut items = SideChannelMap::default();
    let Some(blob) = blob.filter(|b| !b.is_empty()) else {
        return Ok(items);
    };

    match decode_into(blob, &mut items) {
        Ok(()) => Ok(items),
        Err(error) => Err(PartialExtra {
            partial: items,
            error,
        }),
    }
}

fn decode_into(blob: &[u8], items: &mut SideChannelMap) -> Result<(), WireError> {
    let mut pos = 0;
    while pos < blob.len() {
        let (tag, next) = wire::read_tag(blob, pos)?;
        pos = match (tag.field, tag.wire_type) {
            (1, WIRE_LEN) => wire::read_length_delimited(blob, next)?.1,
            (3, WIRE_LEN) => {
                let (record, after) = wire::read_length_delimited(blob, next)?;
                if let Some((type_id, value)) = decode_record(record)? {
                    items.insert(type_id, value);
                }
                after
            }
            (_, wire_type) => wire::skip_field(wire_type, blob, next)?,
        };
    }
    Ok(())
}

/// Decode one nested `{type id, value}` record. `None` when no type id was present.
fn decode_record(record: &[u8]) -> Result<Option<(u64, String)>, WireError> {
    let mut pos = 0;
    let mut type_id = None;
    let mut value = None;

    while pos < record.len() {
        let (tag, next) = wire::read_tag(record, pos)?;
        pos = match (tag.field, tag.wire_type) {
            (1, _) => {
                let (id, after) = wire::read_varint(record, next)?;
                type_id = Some(id);
                after
            }
            (2, WIRE_LEN) => {
                let (raw, after) = wire::read_length_delimited(record, next)?;
                value = Some(String::from_utf8_lossy(raw).into_owned());
                after
            }
            (_, wire_type) => wire::skip_field(wire_type, record, next)?,
        };
    }

    Ok(type_id.map(|id| (id, value.unwrap_or_default())))
}
