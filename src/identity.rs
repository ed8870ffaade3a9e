//! Entry identity and duplicate resolution.
//!
//! Every entry carries a `guid`. When the source supplies one (RSS `guid`,
//! Atom `id`) or at least a link, that value is the entry's natural identity
//! and is stable across refreshes. Otherwise a guid is synthesized from the
//! feed URL, the ingestion time and a random component. Synthesized guids are
//! unique per fetch, so such entries are stored again on every refresh.
//!
//! [`DedupResolver`] decides insert-vs-skip for candidates at write time.
//! Identity is exact string equality on `guid`, scoped to `feed_url`.

use std::collections::{HashMap, HashSet};

use crate::storage::EntryRecord;

/// Resolve an entry's guid: the natural id, then the link, then a synthesized value.
///
/// Blank strings count as absent.
pub fn resolve_guid(natural: Option<&str>, link: Option<&str>, feed_url: &str, now_millis: i64) -> String {
    fn usable(s: Option<&str>) -> Option<&str> {
        s.map(str::trim).filter(|s| !s.is_empty())
    }

    usable(natural)
        .or_else(|| usable(link))
        .map(str::to_owned)
        .unwrap_or_else(|| synthesize_guid(feed_url, now_millis))
}

/// `{feed_url}-{now_millis}-{random}`.
pub fn synthesize_guid(feed_url: &str, now_millis: i64) -> String {
    format!("{}-{}-{}", feed_url, now_millis, uuid::Uuid::new_v4().simple())
}

/// Outcome of resolving one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Skip,
}

/// Tracks known guids per feed and classifies candidates.
///
/// Seed it with the guids already stored for a feed, then call
/// [`DedupResolver::resolve`] once per candidate in batch order. A guid
/// accepted earlier in the same batch is also known, so a response that
/// repeats an item keeps only the first occurrence.
#[derive(Debug, Default)]
pub struct DedupResolver {
    known: HashMap<String, HashSet<String>>,
}

impl DedupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register guids already present in storage for `feed_url`.
    pub fn seed<I>(&mut self, feed_url: &str, stored_guids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.known
            .entry(feed_url.to_owned())
            .or_default()
            .extend(stored_guids);
    }

    /// Whether `feed_url` has been seeded (or has seen a candidate).
    pub fn is_seeded(&self, feed_url: &str) -> bool {
        self.known.contains_key(feed_url)
    }

    /// Classify `candidate`; on `Insert` its guid becomes known.
    pub fn resolve(&mut self, candidate: &EntryRecord) -> Decision {
        let guids = self.known.entry(candidate.feed_url.clone()).or_default();
        if guids.insert(candidate.guid.clone()) {
            Decision::Insert
        } else {
            Decision::Skip
        }
    }
}
