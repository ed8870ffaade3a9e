//! Ingestion orchestrator: fetch → parse → dedup-insert → snapshot refresh.
//!
//! [`Ingestor`] owns an explicitly constructed [`Database`] handle, a fetch
//! collaborator and a clock. It keeps an in-memory snapshot of feeds and
//! entries for readers and reloads it from storage after every mutation.

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::feed::{parse_feed, Fetch, FetchError, ParseError, ParsedFeed};
use crate::storage::{Database, EntryRecord, FeedMetadata, FeedWrite, StorageError};
use crate::util::{validate_feed_url, Clock, HostPolicy, UrlValidationError};

const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Feed already exists: {0}")]
    AlreadySubscribed(String),
    #[error("Feed not found: {0}")]
    NotSubscribed(String),
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
    #[error("Failed to fetch feed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of [`Ingestor::refresh_all`].
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// New entries stored across all feeds
    pub inserted: usize,
    /// Feeds that failed, with the reason; other feeds were still refreshed
    pub failures: Vec<(String, IngestError)>,
}

impl RefreshReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// In-memory view of the store, newest entries first.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    feeds: Vec<FeedMetadata>,
    entries: Vec<EntryRecord>,
}

pub struct Ingestor<F, C> {
    db: Database,
    fetcher: F,
    clock: C,
    host_policy: HostPolicy,
    concurrency: usize,
    state: RwLock<Snapshot>,
}

impl<F: Fetch, C: Clock> Ingestor<F, C> {
    pub fn new(db: Database, fetcher: F, clock: C) -> Self {
        Self {
            db,
            fetcher,
            clock,
            host_policy: HostPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            state: RwLock::new(Snapshot::default()),
        }
    }

    pub fn with_host_policy(mut self, policy: HostPolicy) -> Self {
        self.host_policy = policy;
        self
    }

    /// Maximum feeds fetched at once by [`Ingestor::refresh_all`]. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // Core operations
    // ========================================================================

    /// Parse raw feed text using this ingestor's clock.
    pub fn parse_feed(&self, raw: &str, feed_url: &str) -> Result<ParsedFeed, ParseError> {
        parse_feed(raw, feed_url, &self.clock)
    }

    /// Dedup-insert candidates for `feed_url` in one transaction.
    ///
    /// Every candidate is scoped to the normalized `feed_url` regardless of
    /// the value it carries. Returns the number of new rows.
    pub async fn ingest_batch(
        &self,
        feed_url: &str,
        mut entries: Vec<EntryRecord>,
    ) -> Result<usize, StorageError> {
        let key = feed_key(feed_url);
        for entry in &mut entries {
            entry.feed_url.clone_from(&key);
        }

        let inserted = self.db.insert_entries(&entries).await?;
        tracing::debug!(
            feed = %key,
            candidates = entries.len(),
            inserted = inserted,
            "Ingested batch"
        );
        self.load().await?;
        Ok(inserted)
    }

    pub async fn get_feeds(&self) -> Result<Vec<FeedMetadata>, StorageError> {
        self.db.get_feeds().await
    }

    /// Stored entries, newest first; all feeds when `feed_url` is `None`.
    pub async fn get_entries(&self, feed_url: Option<&str>) -> Result<Vec<EntryRecord>, StorageError> {
        let mut entries = match feed_url {
            Some(url) => self.db.get_entries_by_feed(&feed_key(url)).await?,
            None => self.db.get_entries().await?,
        };
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    /// Unsubscribe: delete the feed and all of its entries.
    pub async fn remove_feed(&self, url: &str) -> Result<(), StorageError> {
        let key = feed_key(url);
        let removed = self.db.delete_feed(&key).await?;
        tracing::info!(feed = %key, entries = removed, "Feed removed");

        let mut state = self.state.write().await;
        state.feeds.retain(|f| f.url != key);
        state.entries.retain(|e| e.feed_url != key);
        Ok(())
    }

    // ========================================================================
    // Subscription lifecycle
    // ========================================================================

    /// Reload the snapshot from storage.
    pub async fn load(&self) -> Result<(), StorageError> {
        let feeds = self.db.get_feeds().await?;
        let mut entries = self.db.get_entries().await?;
        sort_newest_first(&mut entries);

        tracing::debug!(feeds = feeds.len(), entries = entries.len(), "Snapshot loaded");
        *self.state.write().await = Snapshot { feeds, entries };
        Ok(())
    }

    /// Subscribe to a new feed: validate, fetch, parse, then store the feed
    /// and its entries in one transaction.
    ///
    /// # Errors
    ///
    /// - [`IngestError::AlreadySubscribed`] if the URL is already stored
    /// - [`IngestError::InvalidUrl`] if the URL fails validation
    /// - [`IngestError::Fetch`] / [`IngestError::Parse`] if retrieval fails; nothing is stored
    pub async fn add_feed(&self, url: &str) -> Result<FeedMetadata, IngestError> {
        let key = validate_feed_url(url, self.host_policy)?.to_string();

        if self.db.get_feed(&key).await?.is_some() {
            return Err(IngestError::AlreadySubscribed(key));
        }

        let raw = self.fetcher.fetch(&key).await?;
        let ParsedFeed { feed, entries } = self.parse_feed(&raw, &key)?;

        let inserted = match self.db.commit_fetch(&feed, &entries, FeedWrite::Insert).await {
            Ok(n) => n,
            Err(StorageError::DuplicateKey(_)) => return Err(IngestError::AlreadySubscribed(key)),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(feed = %key, title = %feed.title, inserted = inserted, "Feed added");
        self.load().await?;
        Ok(feed)
    }

    /// Fetch a subscribed feed again and store its new entries.
    ///
    /// Feed metadata is replaced by the fetched values, except `unread_count`
    /// which is kept and `favicon` which is kept when the feed no longer
    /// provides one. `last_fetched` is set to the current time. Returns the
    /// number of new entries.
    pub async fn refresh_feed(&self, url: &str) -> Result<usize, IngestError> {
        let inserted = self.refresh_one(&feed_key(url)).await?;
        self.load().await?;
        Ok(inserted)
    }

    /// Refresh every subscribed feed, at most `concurrency` at a time.
    ///
    /// A failing feed does not stop the others; its error is collected in
    /// the report.
    pub async fn refresh_all(&self) -> Result<RefreshReport, StorageError> {
        let feeds = self.db.get_feeds().await?;
        let total = feeds.len();

        let results: Vec<(String, Result<usize, IngestError>)> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.refresh_one(&feed.url).await;
                (feed.url, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = RefreshReport::default();
        for (url, result) in results {
            match result {
                Ok(n) => report.inserted += n,
                Err(e) => {
                    tracing::warn!(feed = %url, error = %e, "Feed refresh failed");
                    report.failures.push((url, e));
                }
            }
        }

        tracing::info!(
            feeds = total,
            inserted = report.inserted,
            failed = report.failures.len(),
            "Refresh complete"
        );
        self.load().await?;
        Ok(report)
    }

    async fn refresh_one(&self, key: &str) -> Result<usize, IngestError> {
        let existing = self
            .db
            .get_feed(key)
            .await?
            .ok_or_else(|| IngestError::NotSubscribed(key.to_string()))?;

        let raw = self.fetcher.fetch(key).await?;
        let ParsedFeed { feed, entries } = self.parse_feed(&raw, key)?;

        let merged = FeedMetadata {
            url: existing.url,
            favicon: feed.favicon.or(existing.favicon),
            last_fetched: Some(self.clock.now_millis()),
            unread_count: existing.unread_count,
            ..feed
        };

        let inserted = self
            .db
            .commit_fetch(&merged, &entries, FeedWrite::Replace)
            .await?;
        tracing::debug!(feed = %key, candidates = entries.len(), inserted = inserted, "Feed refreshed");
        Ok(inserted)
    }

    // ========================================================================
    // Snapshot accessors
    // ========================================================================

    pub async fn feeds(&self) -> Vec<FeedMetadata> {
        self.state.read().await.feeds.clone()
    }

    /// All entries, newest first.
    pub async fn entries(&self) -> Vec<EntryRecord> {
        self.state.read().await.entries.clone()
    }

    /// Entries of one feed, newest first.
    pub async fn entries_for_feed(&self, feed_url: &str) -> Vec<EntryRecord> {
        let key = feed_key(feed_url);
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.feed_url == key)
            .cloned()
            .collect()
    }
}

/// Canonical key for a subscription URL; unparseable input is used as-is.
fn feed_key(url: &str) -> String {
    let trimmed = url.trim();
    url::Url::parse(trimmed)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| trimmed.to_string())
}

fn sort_newest_first(entries: &mut [EntryRecord]) {
    entries.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));
}
