//! Display text for a message.
//!
//! Plain messages pass `StrContent` through. App messages (type 49) keep their body in
//! `CompressContent` as a raw LZ4 block without a size prefix, so the uncompressed size
//! has to be guessed: start at four times the input and double until it fits.

use crate::model::DecodedContent;
use crate::model::msg_type::{APP, TEXT};
use roxmltree::{Document, Node, ParsingOptions};
use tracing::debug;

pub const MIN_SIZE_GUESS: usize = 4096;
pub const MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

pub fn decode_content(
    msg_type: i64,
    _sub_type: i64,
    str_content: Option<&str>,
    compress_content: Option<&[u8]>,
) -> DecodedContent {
    let plain = str_content.unwrap_or_default();
    let mut out = DecodedContent {
        text: plain.to_string(),
        raw: plain.to_string(),
        ..Default::default()
    };

    if msg_type == APP
        && let Some(payload) = compress_content.filter(|p| !p.is_empty())
    {
        match decompress_adaptive(payload) {
            Some(bytes) => apply_app_message(&mut out, &bytes),
            None => debug!(
                compressed_len = payload.len(),
                "CompressContent did not decompress within {} bytes, keeping StrContent",
                MAX_DECOMPRESSED_SIZE
            ),
        }
    }

    if msg_type != TEXT && looks_like_markup(&out.text) {
        out.raw = std::mem::take(&mut out.text);
    }

    out
}

/// Decompress an unprefixed LZ4 block, growing the output buffer until it fits.
pub fn decompress_adaptive(payload: &[u8]) -> Option<Vec<u8>> {
    let mut guess = payload.len().saturating_mul(4).max(MIN_SIZE_GUESS);
    while guess <= MAX_DECOMPRESSED_SIZE {
        if let Ok(bytes) = lz4::block::decompress(payload, Some(i32::try_from(guess).ok()?)) {
            return Some(bytes);
        }
        guess *= 2;
    }
    None
}

fn apply_app_message(out: &mut DecodedContent, bytes: &[u8]) {
    let decoded = String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string();

    let fields = AppMsgFields::parse(&decoded);

    let mut text = match &fields.title {
        Some(title) => title.clone(),
        None => decoded.trim().to_string(),
    };
    if let Some(summary) = &fields.description {
        text.push_str(" | ");
        text.push_str(summary);
    }

    if let Some(url) = fields.url {
        out.meta.insert("url".into(), url);
    }
    if let Some(title) = fields.title {
        out.meta.insert("title".into(), title);
    }
    if let Some(summary) = fields.description {
        out.meta.insert("description".into(), summary);
    }

    out.text = text;
    out.raw = decoded;
}

fn looks_like_markup(text: &str) -> bool {
    let preview = text.trim();
    preview.starts_with("<?xml") || preview.starts_with("<msg")
}

/// The handful of `<appmsg>` children shown in exports.
#[derive(Debug, Default, PartialEq, Eq)]
struct AppMsgFields {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

impl AppMsgFields {
    /// Malformed XML yields no fields at all.
    fn parse(xml: &str) -> Self {
        let opts = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let Ok(doc) = Document::parse_with_options(xml, opts) else {
            return Self::default();
        };
        let Some(appmsg) = child(doc.root_element(), "appmsg") else {
            return Self::default();
        };

        Self {
            title: child_text(appmsg, "title"),
            description: child_text(appmsg, "des").or_else(|| child_text(appmsg, "digest")),
            url: child_text(appmsg, "url"),
        }
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    let text = child(node, name)?.text().unwrap_or_default().trim();
    (!text.is_empty()).then(|| text.to_string())
}
