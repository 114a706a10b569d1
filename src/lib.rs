//! # wechat-chat-export
//!
//! Exports a decrypted WeChat (PC) chat archive to one CSV file per conversation.
//!
//! ## What it does
//!
//! WeChat keeps messages in sharded SQLite databases (`MSG0.db`, `MSG1.db`, ...). Most of
//! a row is easy to read, but two columns are not:
//!
//! - `BytesExtra`, a protobuf-style blob carrying the sender of group messages and the
//!   on-disk paths of images, voice notes and videos ([`extra`], built on [`wire`]).
//! - `CompressContent`, an LZ4 block holding the XML body of link/file/mini-program
//!   messages ([`content`]).
//!
//! Each row becomes a [`model::NormalizedMessage`] ([`builder`]). Display labels for the
//! conversation and the sender are then filled in from the contact book and group member
//! directory in `FTSContact.db` ([`directory`], [`resolver`]).
//!
//! The databases are opened **read-only**.
//!
//! ## Usage
//!
//! ```sh
//! # Export every conversation
//! wechat-chat-export ~/wechat/decrypted --output ~/wechat/csv
//!
//! # A couple of conversations, by id or remark, for 2024 only
//! wechat-chat-export ~/wechat/decrypted --output out --talkers wxid_abc,Mom \
//!     --start 2024-01-01 --end "2024-12-31 23:59:59"
//! ```
//!
//! Preferences can be persisted in `~/.config/wechat-chat-export/config.toml`.
pub mod builder;
pub mod content;
pub mod datasource;
pub mod directory;
pub mod exporter;
pub mod extra;
pub mod model;
pub mod parallel;
pub mod resolver;
pub mod utils;
pub mod wire;
