use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use super::tree::{parse_document, Element, TextOrNode, TreeError};
use super::{atom, rss2};
use crate::storage::{EntryRecord, FeedMetadata};
use crate::util::Clock;

/// Feed-level title when the source has none.
pub const UNTITLED_FEED: &str = "Untitled Feed";
/// Entry-level title when the source has none.
pub const UNTITLED_ENTRY: &str = "Untitled";

#[derive(Debug, Error)]
pub enum ParseError {
    /// The root element is neither `<rss>` nor `<feed>`
    #[error("Unknown feed format")]
    UnknownFormat,
    /// The document could not be read as a feed
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

impl From<TreeError> for ParseError {
    fn from(err: TreeError) -> Self {
        ParseError::Malformed(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss2,
    Atom,
}

/// Normalized output of [`parse_feed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub feed: FeedMetadata,
    pub entries: Vec<EntryRecord>,
}

/// Per-parse inputs shared by the format extractors.
pub(super) struct Context<'a> {
    pub feed_url: &'a str,
    /// Ingestion time, used for `last_fetched` and missing dates
    pub now: i64,
}

/// Select the extractor for a document root.
pub fn detect_format(root: &Element) -> Option<FeedFormat> {
    match root.name() {
        "rss" => Some(FeedFormat::Rss2),
        "feed" => Some(FeedFormat::Atom),
        _ => None,
    }
}

/// Parse raw feed text into feed metadata and entry candidates.
///
/// Pure apart from one `clock` read, which supplies `last_fetched` and the
/// fallback for entries without a usable date.
///
/// # Errors
///
/// - [`ParseError::Malformed`] if the text is not well-formed XML or an RSS
///   document lacks its `<channel>`
/// - [`ParseError::UnknownFormat`] if the root is neither `<rss>` nor `<feed>`
pub fn parse_feed(raw: &str, feed_url: &str, clock: &dyn Clock) -> Result<ParsedFeed, ParseError> {
    let root = parse_document(raw)?.ok_or(ParseError::UnknownFormat)?;
    let ctx = Context {
        feed_url,
        now: clock.now_millis(),
    };

    let parsed = match detect_format(&root) {
        Some(FeedFormat::Rss2) => rss2::extract(&root, &ctx)?,
        Some(FeedFormat::Atom) => atom::extract(&root, &ctx),
        None => return Err(ParseError::UnknownFormat),
    };

    tracing::debug!(
        feed = %feed_url,
        entries = parsed.entries.len(),
        "Parsed feed"
    );
    Ok(parsed)
}

// ============================================================================
// Shared field helpers
// ============================================================================

/// Non-blank text of an optional element, whatever its shape.
pub(super) fn text_of(element: Option<&Element>) -> Option<&str> {
    element
        .and_then(Element::text_or_node)
        .map(TextOrNode::text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Non-blank text of the first child called `name`.
pub(super) fn child_text<'a>(parent: &'a Element, name: &str) -> Option<&'a str> {
    text_of(parent.child(name))
}

/// Non-blank attribute value.
pub(super) fn attr_of<'a>(element: &'a Element, key: &str) -> Option<&'a str> {
    element.attr(key).map(str::trim).filter(|s| !s.is_empty())
}

/// Byte length from an attribute: leading digits, anything unparseable is 0.
pub(super) fn parse_length(raw: Option<&str>) -> i64 {
    let Some(raw) = raw else { return 0 };
    let trimmed = raw.trim_start();
    let digits_end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..digits_end].parse().unwrap_or(0)
}

/// Parse a feed date to epoch milliseconds.
///
/// Accepts RFC 2822 (RSS), RFC 3339 (Atom) and a few common near-misses.
/// Zone-less values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }

    const ZONED: [&str; 3] = [
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%a, %d %b %Y %H:%M:%S %z",
    ];
    for format in ZONED {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.timestamp_millis());
        }
    }

    const NAIVE: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
    for format in NAIVE {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
