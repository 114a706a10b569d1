use crate::content::decode_content;
use crate::extra::{self, FIELD_MEDIA_PATH, FIELD_MEMBER_ID, FIELD_THUMB_PATH, SideChannelMap};
use crate::model::{CHATROOM_SUFFIX, NormalizedMessage, RawMessageRow, SELF_SENDER, msg_type};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use tracing::warn;

/// Turn one `MSG` row into a message with decoded content. Display labels are left
/// blank for the resolver.
pub fn build_message(row: &RawMessageRow) -> NormalizedMessage {
    let side_channel = match extra::parse_bytes_extra(row.bytes_extra.as_deref()) {
        Ok(map) => map,
        Err(e) => {
            warn!(
                talker = %row.talker,
                server_id = row.server_id.unwrap_or_default(),
                "{}",
                e
            );
            e.into_partial()
        }
    };

    let is_chatroom = row.talker.ends_with(CHATROOM_SUFFIX);
    let sender = if is_chatroom {
        side_channel.get(FIELD_MEMBER_ID).unwrap_or_default().to_string()
    } else if row.is_sender {
        SELF_SENDER.to_string()
    } else {
        row.talker.clone()
    };

    let kind = row.msg_type.unwrap_or_default();
    let sub_type = row.sub_type.unwrap_or_default();
    let decoded = decode_content(
        kind,
        sub_type,
        row.str_content.as_deref(),
        row.compress_content.as_deref(),
    );

    let mut extras = decoded.meta;
    insert_media_paths(kind, &side_channel, &mut extras);

    NormalizedMessage {
        server_id: row.server_id.unwrap_or_default(),
        sequence: row.sequence.unwrap_or_default(),
        timestamp: local_time(row.create_time),
        talker: row.talker.clone(),
        talker_display: String::new(),
        is_chatroom,
        is_self: row.is_sender,
        msg_type: kind,
        sub_type,
        sender,
        sender_display: String::new(),
        content: decoded.text.trim().to_string(),
        raw_content: decoded.raw,
        extras,
    }
}

fn insert_media_paths(
    kind: i64,
    side_channel: &SideChannelMap,
    extras: &mut BTreeMap<String, String>,
) {
    let slots: &[(u64, &str)] = match kind {
        msg_type::VOICE => &[(FIELD_MEDIA_PATH, "voice_path")],
        msg_type::IMAGE => &[
            (FIELD_MEDIA_PATH, "image_path"),
            (FIELD_THUMB_PATH, "thumb_path"),
        ],
        msg_type::VIDEO => &[(FIELD_MEDIA_PATH, "video_path")],
        _ => &[],
    };
    for &(field, key) in slots {
        if let Some(path) = side_channel.non_empty(field) {
            extras.insert(key.to_string(), normalize_media_path(path));
        }
    }
}

/// Use forward slashes and drop the leading account directory.
///
/// `wxid_me\FileStorage\Image\a.dat` becomes `FileStorage/Image/a.dat`.
pub fn normalize_media_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    match unified.split_once('/') {
        Some((_, rest)) => rest.to_string(),
        None => unified,
    }
}

fn local_time(unix_secs: i64) -> DateTime<Local> {
    DateTime::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .with_timezone(&Local)
}
