use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use eyre::{Context, Result, eyre};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub contact_db: Option<PathBuf>,
    pub talkers: Option<Vec<String>>,
    pub range: TimeRange,
    pub limit: Option<usize>,
    pub workers: usize,
    pub self_label: Option<String>,
}

/// Inclusive `CreateTime` bounds, in Unix seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Local>>, end: Option<DateTime<Local>>) -> Self {
        Self {
            start: start.map(|t| t.timestamp()),
            end: end.map(|t| t.timestamp()),
        }
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse `2025-01-01`, `2025-01-01T12:00` and friends as local wall-clock time.
pub fn parse_local_datetime(value: &str) -> Result<DateTime<Local>> {
    let value = value.trim();
    let naive = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        })
        .ok_or_else(|| eyre!("Unrecognised date/time: {:?}", value))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| eyre!("{:?} does not exist in the local time zone", value))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open database: {}", path.display()))?;
    conn.execute_batch("PRAGMA cache_size = -16384;")
        .wrap_err("Failed to set cache_size")?;
    Ok(conn)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |row| row.get(0),
        )
        .wrap_err_with(|| format!("Failed to look up table {}", table))?;
    Ok(count > 0)
}

/// Read a column that may hold a BLOB, TEXT or NULL as bytes.
pub fn bytes_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<u8>>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Blob(b) | ValueRef::Text(b) => Some(b.to_vec()),
        _ => None,
    })
}

/// Read a column that may hold TEXT, a BLOB or NULL as a string, replacing bad UTF-8.
pub fn text_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Blob(b) | ValueRef::Text(b) => Some(String::from_utf8_lossy(b).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Null => None,
    })
}

/// Read an integer column that may have been stored as REAL or TEXT. Unparseable
/// values read as NULL.
pub fn integer_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<i64>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(f) if f.is_finite() => Some(f as i64),
        ValueRef::Text(b) | ValueRef::Blob(b) => {
            std::str::from_utf8(b).ok().and_then(|s| s.trim().parse().ok())
        }
        ValueRef::Real(_) | ValueRef::Null => None,
    })
}
