use crate::model::NormalizedMessage;
use eyre::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const EXPORT_HEADER: [&str; 10] = [
    "timestamp",
    "talker_display",
    "talker_id",
    "sender_display",
    "sender_id",
    "message_type",
    "message_subtype",
    "content",
    "raw_content",
    "extras",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn write_messages_csv<W: Write>(writer: W, messages: &[NormalizedMessage]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(EXPORT_HEADER)
        .wrap_err("Failed to write CSV header")?;

    for msg in messages {
        let extras = if msg.extras.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&msg.extras).wrap_err("Failed to serialize extras")?
        };
        csv.write_record([
            msg.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            msg.talker_display.clone(),
            msg.talker.clone(),
            msg.sender_display.clone(),
            msg.sender.clone(),
            msg.msg_type.to_string(),
            msg.sub_type.to_string(),
            msg.content.clone(),
            msg.raw_content.clone(),
            extras,
        ])
        .wrap_err_with(|| format!("Failed to write message {}", msg.server_id))?;
    }

    csv.flush().wrap_err("Failed to flush CSV")?;
    Ok(())
}

pub fn write_csv_file(path: &Path, messages: &[NormalizedMessage]) -> Result<()> {
    let file =
        File::create(path).wrap_err_with(|| format!("Failed to create: {}", path.display()))?;
    write_messages_csv(file, messages)
}

/// `<slug of the display label>__<hash of the talker id>.csv`
///
/// The hash keeps two talkers with the same display name apart.
pub fn csv_file_name(talker: &str, talker_display: &str) -> String {
    let base = match talker_display.trim() {
        "" => talker,
        label => label,
    };
    let raw_slug = slug::slugify(base);
    // slug output is ASCII-only, so byte == char
    let slug = raw_slug[..raw_slug.len().min(60)].trim_end_matches('-');
    let slug = if slug.is_empty() { "conversation" } else { slug };

    let digest = Sha256::digest(talker.as_bytes());
    let suffix: String = digest[..3].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}__{}.csv", slug, suffix)
}
