use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::schema::Database;
use super::types::{encode_categories, EntryDbRow, EntryRecord, StorageError, ENTRY_COLUMNS};
use crate::identity::{Decision, DedupResolver};

/// Rows per multi-VALUES INSERT. 11 columns * 50 = 550 binds, under SQLite's 999 limit.
const INSERT_BATCH_SIZE: usize = 50;

/// Hard cap for recency queries (OOM protection)
const MAX_RECENT_ENTRIES: i64 = 2000;

impl Database {
    // ========================================================================
    // Entry Mutations
    // ========================================================================

    /// Insert every candidate whose guid is not already stored for its feed.
    ///
    /// Duplicates (against storage or earlier in the same batch) are skipped,
    /// not reported. The whole batch commits in one transaction; on error
    /// nothing is written. Returns the number of rows inserted.
    pub async fn insert_entries(&self, entries: &[EntryRecord]) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let (_guard, mut tx) = self.begin_write().await?;
        let inserted = insert_deduplicated(&mut tx, entries).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Replace a stored entry by surrogate id.
    ///
    /// Not used by ingestion. Returns `false` if no row has that id.
    pub async fn update_entry(&self, entry: &EntryRecord) -> Result<bool, StorageError> {
        let id = entry.id.ok_or(StorageError::MissingKey)?;
        let categories = encode_categories(entry.categories.as_ref())?;
        let (url, mime_type, length) = enclosure_columns(entry);

        let (_guard, mut tx) = self.begin_write().await?;
        let result = sqlx::query(
            r#"
            UPDATE entries SET
                feed_url = ?, guid = ?, title = ?, description = ?, link = ?, pub_date = ?,
                author = ?, categories = ?, enclosure_url = ?, enclosure_type = ?, enclosure_length = ?
            WHERE id = ?
        "#,
        )
        .bind(&entry.feed_url)
        .bind(&entry.guid)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(&entry.link)
        .bind(entry.pub_date)
        .bind(&entry.author)
        .bind(categories)
        .bind(url)
        .bind(mime_type)
        .bind(length)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// All entries in insertion order.
    pub async fn get_entries(&self) -> Result<Vec<EntryRecord>, StorageError> {
        let rows = sqlx::query_as::<_, EntryDbRow>(&format!(
            "SELECT {} FROM entries ORDER BY id",
            ENTRY_COLUMNS
        ))
        .fetch_all(self.pool()?)
        .await?;

        rows.into_iter().map(EntryDbRow::into_record).collect()
    }

    /// Entries of one feed in insertion order (served by the `feed_url` index).
    pub async fn get_entries_by_feed(&self, feed_url: &str) -> Result<Vec<EntryRecord>, StorageError> {
        let rows = sqlx::query_as::<_, EntryDbRow>(&format!(
            "SELECT {} FROM entries WHERE feed_url = ? ORDER BY id",
            ENTRY_COLUMNS
        ))
        .bind(feed_url)
        .fetch_all(self.pool()?)
        .await?;

        rows.into_iter().map(EntryDbRow::into_record).collect()
    }

    /// Look up an entry by identity (served by the `guid` index).
    pub async fn get_entry_by_guid(
        &self,
        feed_url: &str,
        guid: &str,
    ) -> Result<Option<EntryRecord>, StorageError> {
        let row = sqlx::query_as::<_, EntryDbRow>(&format!(
            "SELECT {} FROM entries WHERE guid = ? AND feed_url = ? ORDER BY id LIMIT 1",
            ENTRY_COLUMNS
        ))
        .bind(guid)
        .bind(feed_url)
        .fetch_optional(self.pool()?)
        .await?;

        row.map(EntryDbRow::into_record).transpose()
    }

    /// Most recent entries across all feeds, newest `pub_date` first.
    ///
    /// `limit` is capped at 2000.
    pub async fn get_recent_entries(&self, limit: usize) -> Result<Vec<EntryRecord>, StorageError> {
        let limit = i64::try_from(limit)
            .unwrap_or(i64::MAX)
            .min(MAX_RECENT_ENTRIES);

        let rows = sqlx::query_as::<_, EntryDbRow>(&format!(
            "SELECT {} FROM entries ORDER BY pub_date DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.pool()?)
        .await?;

        rows.into_iter().map(EntryDbRow::into_record).collect()
    }
}

/// Dedup-insert `entries` inside an open write transaction.
///
/// Each feed touched by the batch is seeded with its stored guids once; the
/// resolver then filters candidates in batch order. Accepted rows are written
/// with multi-row INSERTs.
pub(crate) async fn insert_deduplicated(
    tx: &mut Transaction<'static, Sqlite>,
    entries: &[EntryRecord],
) -> Result<usize, StorageError> {
    let mut resolver = DedupResolver::new();
    let mut accepted: Vec<&EntryRecord> = Vec::with_capacity(entries.len());

    for entry in entries {
        if !resolver.is_seeded(&entry.feed_url) {
            let stored: Vec<(String,)> = sqlx::query_as("SELECT guid FROM entries WHERE feed_url = ?")
                .bind(&entry.feed_url)
                .fetch_all(&mut **tx)
                .await?;
            resolver.seed(&entry.feed_url, stored.into_iter().map(|(g,)| g));
        }

        match resolver.resolve(entry) {
            Decision::Insert => accepted.push(entry),
            Decision::Skip => {
                tracing::trace!(feed = %entry.feed_url, guid = %entry.guid, "Skipping known entry");
            }
        }
    }

    for chunk in accepted.chunks(INSERT_BATCH_SIZE) {
        let encoded = chunk
            .iter()
            .map(|e| encode_categories(e.categories.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO entries (feed_url, guid, title, description, link, pub_date, author, \
             categories, enclosure_url, enclosure_type, enclosure_length) ",
        );
        builder.push_values(chunk.iter().zip(encoded), |mut b, (entry, categories)| {
            let (url, mime_type, length) = enclosure_columns(entry);
            b.push_bind(entry.feed_url.clone())
                .push_bind(entry.guid.clone())
                .push_bind(entry.title.clone())
                .push_bind(entry.description.clone())
                .push_bind(entry.link.clone())
                .push_bind(entry.pub_date)
                .push_bind(entry.author.clone())
                .push_bind(categories)
                .push_bind(url)
                .push_bind(mime_type)
                .push_bind(length);
        });
        builder.build().execute(&mut **tx).await?;
    }

    let skipped = entries.len() - accepted.len();
    if skipped > 0 {
        tracing::debug!(inserted = accepted.len(), skipped, "Deduplicated entry batch");
    }

    Ok(accepted.len())
}

fn enclosure_columns(entry: &EntryRecord) -> (Option<String>, Option<String>, Option<i64>) {
    match &entry.enclosure {
        Some(e) => (Some(e.url.clone()), Some(e.mime_type.clone()), Some(e.length)),
        None => (None, None, None),
    }
}
