use super::schema::Database;
use super::types::{EntryRecord, FeedMetadata, StorageError};

/// How a fetched feed row is written by [`Database::commit_fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedWrite {
    /// Strict insert; fails with `DuplicateKey` if the URL is already stored
    Insert,
    /// Insert or replace the whole row
    Replace,
}

const FEED_COLUMNS: &str =
    "url, title, description, site_url, favicon, last_fetched, unread_count";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Strict insert. Fails with [`StorageError::DuplicateKey`] if `feed.url` exists.
    pub async fn insert_feed(&self, feed: &FeedMetadata) -> Result<(), StorageError> {
        let (_guard, mut tx) = self.begin_write().await?;
        write_feed(&mut tx, feed, FeedWrite::Insert).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert or replace a feed row.
    pub async fn put_feed(&self, feed: &FeedMetadata) -> Result<(), StorageError> {
        let (_guard, mut tx) = self.begin_write().await?;
        write_feed(&mut tx, feed, FeedWrite::Replace).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_feed(&self, url: &str) -> Result<Option<FeedMetadata>, StorageError> {
        let feed = sqlx::query_as::<_, FeedMetadata>(&format!(
            "SELECT {} FROM feeds WHERE url = ?",
            FEED_COLUMNS
        ))
        .bind(url)
        .fetch_optional(self.pool()?)
        .await?;
        Ok(feed)
    }

    /// All feeds in primary-key order.
    pub async fn get_feeds(&self) -> Result<Vec<FeedMetadata>, StorageError> {
        let feeds = sqlx::query_as::<_, FeedMetadata>(&format!(
            "SELECT {} FROM feeds ORDER BY url",
            FEED_COLUMNS
        ))
        .fetch_all(self.pool()?)
        .await?;
        Ok(feeds)
    }

    /// Delete a feed and every entry whose `feed_url` matches, atomically.
    ///
    /// Returns the number of entries removed. Deleting an unknown URL is not
    /// an error and removes nothing.
    pub async fn delete_feed(&self, url: &str) -> Result<u64, StorageError> {
        let (_guard, mut tx) = self.begin_write().await?;

        sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM entries WHERE feed_url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        tracing::debug!(feed = %url, entries = removed, "Feed deleted");
        Ok(removed)
    }

    /// Persist the outcome of one fetch atomically: write the feed row, then
    /// dedup-insert its entries.
    ///
    /// Returns the number of newly inserted entries. If any step fails,
    /// nothing is committed.
    pub async fn commit_fetch(
        &self,
        feed: &FeedMetadata,
        entries: &[EntryRecord],
        mode: FeedWrite,
    ) -> Result<usize, StorageError> {
        let (_guard, mut tx) = self.begin_write().await?;
        write_feed(&mut tx, feed, mode).await?;
        let inserted = super::entries::insert_deduplicated(&mut tx, entries).await?;
        tx.commit().await?;
        Ok(inserted)
    }
}

async fn write_feed(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    feed: &FeedMetadata,
    mode: FeedWrite,
) -> Result<(), StorageError> {
    let sql = match mode {
        FeedWrite::Insert => {
            "INSERT INTO feeds (url, title, description, site_url, favicon, last_fetched, unread_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        }
        FeedWrite::Replace => {
            "INSERT OR REPLACE INTO feeds (url, title, description, site_url, favicon, last_fetched, unread_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        }
    };

    sqlx::query(sql)
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.site_url)
        .bind(&feed.favicon)
        .bind(feed.last_fetched)
        .bind(feed.unread_count)
        .execute(&mut **tx)
        .await
        .map_err(|e| match StorageError::from_sqlx(e) {
            StorageError::DuplicateKey(_) => StorageError::DuplicateKey(feed.url.clone()),
            other => other,
        })?;

    Ok(())
}
