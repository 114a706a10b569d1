//! Record types shared by the decoding pipeline.
//!
//! Table schema of the message store (`MSG*.db`):
//! ```sql
//! CREATE TABLE MSG (
//!     localId         INTEGER PRIMARY KEY AUTOINCREMENT,
//!     MsgSvrID        INT,
//!     Type            INT,
//!     SubType         INT,
//!     IsSender        INT,
//!     CreateTime      INT,
//!     Sequence        INT DEFAULT 0,
//!     StrTalker       TEXT,
//!     StrContent      TEXT,
//!     CompressContent BLOB,
//!     BytesExtra      BLOB,
//!     ...
//! );
//! ```

use chrono::{DateTime, Local};
use std::collections::BTreeMap;

/// Suffix carried by every group conversation id.
pub const CHATROOM_SUFFIX: &str = "@chatroom";

/// Sender id recorded for messages the archive owner sent in a one-to-one chat.
pub const SELF_SENDER: &str = "self";

/// Default display label for the archive owner.
pub const DEFAULT_SELF_LABEL: &str = "我";

/// Message `Type` codes with special handling.
pub mod msg_type {
    pub const TEXT: i64 = 1;
    pub const IMAGE: i64 = 3;
    pub const VOICE: i64 = 34;
    pub const VIDEO: i64 = 43;
    pub const APP: i64 = 49;
}

/// One row of the `MSG` table, as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessageRow {
    pub server_id: Option<i64>,
    pub sequence: Option<i64>,
    pub create_time: i64,
    pub talker: String,
    pub is_sender: bool,
    pub msg_type: Option<i64>,
    pub sub_type: Option<i64>,
    pub str_content: Option<String>,
    pub compress_content: Option<Vec<u8>>,
    pub bytes_extra: Option<Vec<u8>>,
}

/// Output of the content decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedContent {
    pub text: String,
    pub raw: String,
    pub meta: BTreeMap<String, String>,
}

/// A message after decoding. `talker_display` and `sender_display` stay empty until
/// the resolver has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub server_id: i64,
    pub sequence: i64,
    pub timestamp: DateTime<Local>,
    pub talker: String,
    pub talker_display: String,
    pub is_chatroom: bool,
    pub is_self: bool,
    pub msg_type: i64,
    pub sub_type: i64,
    pub sender: String,
    pub sender_display: String,
    pub content: String,
    pub raw_content: String,
    pub extras: BTreeMap<String, String>,
}

/// A contact-book entry with its alternate names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRecord {
    pub username: String,
    pub alias: String,
    pub nickname: String,
    pub remark: String,
}

impl ContactRecord {
    /// Remark, then alias, then nickname.
    pub fn best_name(&self) -> &str {
        first_non_blank([&self.remark, &self.alias, &self.nickname]).unwrap_or("")
    }

    /// `name(username)`, or the bare username when there is no distinct name.
    pub fn label(&self) -> String {
        let name = self.best_name();
        if name.is_empty() || name == self.username {
            self.username.clone()
        } else {
            format!("{}({})", name, self.username)
        }
    }
}

/// Per-group naming of a member (群昵称 and friends).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMemberRecord {
    pub chatroom: String,
    pub member: String,
    pub group_remark: String,
    pub nickname: String,
    pub alias: String,
}

impl GroupMemberRecord {
    /// Group remark, nickname, alias, then the member's global contact name.
    pub fn best_name<'a>(&'a self, contact: Option<&'a ContactRecord>) -> &'a str {
        first_non_blank([&self.group_remark, &self.nickname, &self.alias])
            .or_else(|| contact.map(ContactRecord::best_name).filter(|n| !n.is_empty()))
            .unwrap_or("")
    }
}

fn first_non_blank<'a, const N: usize>(candidates: [&'a String; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
}
