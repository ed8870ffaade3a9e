use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the feed store.
///
/// Cheap to clone; clones share the same pool and writer lock. The handle has
/// an explicit lifecycle: [`Database::open`] creates the schema, and after
/// [`Database::close`] every operation on any clone fails with
/// [`StorageError::NotInitialized`].
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    /// Serializes multi-row mutations so the dedup check and the insert it
    /// guards are never interleaved with another writer.
    writer: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if needed) the store at `path`.
    ///
    /// `":memory:"` opens a private in-memory store, used by tests. Each call
    /// yields an independent store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Locked` if another process holds the database,
    /// `StorageError::Migration` if schema setup fails.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let in_memory = path == ":memory:";

        let pool = if in_memory {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
            // Every connection to :memory: is a separate database, so pin the
            // pool to exactly one long-lived connection.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            prepare_db_file(path);

            // busy_timeout=5000: wait up to 5s for a competing writer before SQLITE_BUSY
            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path))?
                .journal_mode(SqliteJournalMode::Wal)
                .pragma("busy_timeout", "5000");
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options)
                .await?
        };

        let db = Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        };
        db.migrate().await.map_err(|e| match e {
            StorageError::Locked => StorageError::Locked,
            other => StorageError::Migration(other.to_string()),
        })?;

        tracing::debug!(path = %path, "Feed store opened");
        Ok(db)
    }

    /// Close the store. Waits for in-flight operations to release their connections.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Feed store closed");
    }

    pub fn is_open(&self) -> bool {
        !self.pool.is_closed()
    }

    /// Pool accessor that refuses to hand out a closed pool.
    pub(crate) fn pool(&self) -> Result<&SqlitePool, StorageError> {
        if self.pool.is_closed() {
            return Err(StorageError::NotInitialized);
        }
        Ok(&self.pool)
    }

    /// Begin a write transaction while holding the store-wide writer lock.
    ///
    /// The guard must outlive the transaction; callers keep both bindings
    /// alive until after `commit()`.
    pub(crate) async fn begin_write(
        &self,
    ) -> Result<(MutexGuard<'_, ()>, Transaction<'static, Sqlite>), StorageError> {
        let guard = self.writer.lock().await;
        let tx = self.pool()?.begin().await?;
        Ok((guard, tx))
    }

    /// Create tables and indexes in a single transaction. Idempotent.
    async fn migrate(&self) -> Result<(), StorageError> {
        let mut tx = self.pool()?.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                url TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                site_url TEXT,
                favicon TEXT,
                last_fetched INTEGER,
                unread_count INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_title ON feeds(title)")
            .execute(&mut *tx)
            .await?;

        // No UNIQUE(feed_url, guid): identity is enforced by the dedup resolver
        // at insert time, not by the table.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_url TEXT NOT NULL,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                link TEXT NOT NULL,
                pub_date INTEGER NOT NULL,
                author TEXT,
                categories TEXT,
                enclosure_url TEXT,
                enclosure_type TEXT,
                enclosure_length INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_feed_url ON entries(feed_url)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_guid ON entries(guid)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_pub_date ON entries(pub_date DESC)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// SEC-010: Pre-create the database file user-only (0600) so there is no
/// window where it exists with umask permissions.
fn prepare_db_file(path: &str) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let db_path = std::path::Path::new(path);
        if db_path.exists() {
            if let Err(e) = std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
            }
        } else if db_path.parent().map(|p| p.exists()).unwrap_or(false) {
            // If creation fails, SQLite reports the error at connect time.
            let _ = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(db_path);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_tables() {
        let db = Database::open(":memory:").await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('feeds', 'entries', 'settings') ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(names, vec!["entries", "feeds", "settings"]);
    }

    #[tokio::test]
    async fn test_secondary_indexes_exist() {
        let db = Database::open(":memory:").await.unwrap();
        let indexes: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'entries' AND name LIKE 'idx_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<_> = indexes.into_iter().map(|(n,)| n).collect();
        assert_eq!(
            names,
            vec!["idx_entries_feed_url", "idx_entries_guid", "idx_entries_pub_date"]
        );
    }

    #[tokio::test]
    async fn test_in_memory_stores_are_independent() {
        let a = Database::open(":memory:").await.unwrap();
        let b = Database::open(":memory:").await.unwrap();
        a.set_setting("k", &serde_json::json!(1)).await.unwrap();
        assert_eq!(b.get_setting("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail_not_initialized() {
        let db = Database::open(":memory:").await.unwrap();
        let clone = db.clone();
        db.close().await;

        assert!(!clone.is_open());
        assert!(matches!(
            clone.get_feeds().await,
            Err(StorageError::NotInitialized)
        ));
        assert!(matches!(
            clone.get_setting("theme").await,
            Err(StorageError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_backed_store() {
        let path = std::env::temp_dir().join(format!("feedline_schema_{}.db", uuid::Uuid::new_v4()));
        let path_str = path.to_str().unwrap().to_string();

        let db = Database::open(&path_str).await.unwrap();
        db.set_setting("persisted", &serde_json::json!(true))
            .await
            .unwrap();
        db.close().await;

        let reopened = Database::open(&path_str).await.unwrap();
        assert_eq!(
            reopened.get_setting("persisted").await.unwrap(),
            Some(serde_json::json!(true))
        );
        reopened.close().await;

        for suffix in ["", "-wal", "-shm"] {
            std::fs::remove_file(format!("{}{}", path_str, suffix)).ok();
        }
    }
}
