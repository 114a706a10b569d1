//! Access to the decrypted `MSG*.db` message stores.
//!
//! Messages of one archive are sharded across `MSG0.db`, `MSG1.db`, ... and sometimes a
//! `Multi/` subdirectory. A talker's history may span several shards.

use crate::builder::build_message;
use crate::model::{NormalizedMessage, RawMessageRow};
use crate::utils::{
    TimeRange, bytes_column, integer_column, open_db, table_exists, text_column,
};
use eyre::{Context, Result, eyre};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const MSG_DIR: &str = "Msg";
const MULTI_DIR: &str = "Multi";
const NAME_TABLES: &[&str] = &["Name2ID", "Name2ID_v1"];

pub struct MessageStore {
    message_dbs: Vec<PathBuf>,
}

impl MessageStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let message_dbs = discover_message_dbs(data_dir);
        if message_dbs.is_empty() {
            return Err(eyre!("No MSG*.db files found under {}", data_dir.display()));
        }
        debug!(count = message_dbs.len(), "Discovered message databases");
        Ok(Self { message_dbs })
    }

    pub fn from_paths(message_dbs: Vec<PathBuf>) -> Self {
        Self { message_dbs }
    }

    pub fn message_dbs(&self) -> &[PathBuf] {
        &self.message_dbs
    }

    /// Every conversation id known to any shard, sorted.
    pub fn list_talkers(&self) -> Result<Vec<String>> {
        let mut talkers = BTreeSet::new();
        for db_path in &self.message_dbs {
            let conn = open_db(db_path)?;
            for table in NAME_TABLES {
                if !table_exists(&conn, table)? {
                    continue;
                }
                let mut stmt = conn
                    .prepare(&format!("SELECT UsrName FROM {}", table))
                    .wrap_err_with(|| format!("Failed to prepare {} query", table))?;
                let names = stmt
                    .query_map([], |row| text_column(row, 0))?
                    .collect::<Result<Vec<_>, _>>()
                    .wrap_err_with(|| format!("Failed to read {} in {}", table, db_path.display()))?;
                talkers.extend(names.into_iter().flatten().filter(|n| !n.is_empty()));
            }
        }
        Ok(talkers.into_iter().collect())
    }

    /// Open every shard once. The returned reader is meant to stay with one thread.
    pub fn connect(&self) -> Result<StoreReader> {
        let shards = self
            .message_dbs
            .iter()
            .map(|path| Ok((path.clone(), open_db(path)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(StoreReader { shards })
    }

    /// One-off read of a talker's messages. Workers should hold a [`StoreReader`].
    pub fn messages(
        &self,
        talker: &str,
        range: &TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<NormalizedMessage>> {
        self.connect()?.messages(talker, range, limit)
    }
}

/// Open connections to every shard of a [`MessageStore`].
pub struct StoreReader {
    shards: Vec<(PathBuf, Connection)>,
}

impl StoreReader {
    /// Messages of `talker` ordered by (timestamp, sequence).
    pub fn messages(
        &self,
        talker: &str,
        range: &TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<NormalizedMessage>> {
        let talker = talker.trim();
        if talker.is_empty() {
            return Err(eyre!("talker must not be empty"));
        }

        let mut remaining = limit;
        let mut collected = Vec::new();
        for (db_path, conn) in &self.shards {
            if remaining == Some(0) {
                break;
            }
            let rows = query_rows(conn, talker, range, remaining)
                .wrap_err_with(|| format!("Failed to read messages from {}", db_path.display()))?;
            if let Some(left) = remaining.as_mut() {
                *left = left.saturating_sub(rows.len());
            }
            collected.extend(rows.iter().map(build_message));
        }

        collected.sort_by_key(|m| (m.timestamp, m.sequence));
        if let Some(limit) = limit {
            collected.truncate(limit);
        }
        Ok(collected)
    }
}

fn query_rows(
    conn: &Connection,
    talker: &str,
    range: &TimeRange,
    limit: Option<usize>,
) -> Result<Vec<RawMessageRow>> {
    if !table_exists(conn, "MSG")? {
        return Ok(Vec::new());
    }

    let mut sql = String::from(
        "SELECT MsgSvrID, Sequence, CreateTime, StrTalker, IsSender, \
                Type, SubType, StrContent, CompressContent, BytesExtra \
         FROM MSG WHERE StrTalker = ?",
    );
    let mut params = vec![Value::Text(talker.to_string())];
    if let Some(start) = range.start {
        sql.push_str(" AND CreateTime >= ?");
        params.push(Value::Integer(start));
    }
    if let Some(end) = range.end {
        sql.push_str(" AND CreateTime <= ?");
        params.push(Value::Integer(end));
    }
    sql.push_str(" ORDER BY Sequence ASC");
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    let mut stmt = conn.prepare(&sql).wrap_err("Failed to prepare MSG query")?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(RawMessageRow {
                server_id: integer_column(row, 0)?,
                sequence: integer_column(row, 1)?,
                create_time: integer_column(row, 2)?.unwrap_or_default(),
                talker: text_column(row, 3)?.unwrap_or_default(),
                is_sender: integer_column(row, 4)?.unwrap_or_default() != 0,
                msg_type: integer_column(row, 5)?,
                sub_type: integer_column(row, 6)?,
                str_content: text_column(row, 7)?,
                compress_content: bytes_column(row, 8)?,
                bytes_extra: bytes_column(row, 9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("Failed to read MSG rows")?;
    Ok(rows)
}

/// Find `MSG*.db` under `data_dir` and `data_dir/Msg`, including their `Multi/` folders.
pub fn discover_message_dbs(data_dir: &Path) -> Vec<PathBuf> {
    let mut roots = vec![data_dir.to_path_buf()];
    let msg_dir = data_dir.join(MSG_DIR);
    if msg_dir.is_dir() {
        roots.push(msg_dir);
    }

    let mut found = BTreeSet::new();
    for root in roots {
        for dir in [root.clone(), root.join(MULTI_DIR)] {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("MSG") && name.ends_with(".db") && entry.path().is_file() {
                    let path = entry.path();
                    found.insert(fs::canonicalize(&path).unwrap_or(path));
                }
            }
        }
    }

    let mut paths: Vec<PathBuf> = found.into_iter().collect();
    paths.sort_by_key(|p| db_sort_key(p));
    paths
}

/// `Multi/` shards first, then by the trailing number of the file stem.
fn db_sort_key(path: &Path) -> (bool, u64, PathBuf) {
    let in_multi = path
        .parent()
        .and_then(Path::file_name)
        .is_some_and(|n| n == MULTI_DIR);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let number = trailing_number(&stem).unwrap_or(0);
    (!in_multi, number, path.to_path_buf())
}

fn trailing_number(stem: &str) -> Option<u64> {
    let digits_start = stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[digits_start..].parse().ok()
}
