use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer failures.
///
/// Raw `sqlx` errors are classified through [`StorageError::from_sqlx`] so that
/// callers can match on the conditions they care about (closed handle,
/// primary-key collision, lock contention) without inspecting driver messages.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store was closed, or an operation raced its shutdown
    #[error("Store is not initialized")]
    NotInitialized,

    /// Strict insert hit an existing primary key
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// An update was attempted on a record that was never stored
    #[error("Entry has no surrogate id; it must be inserted before it can be updated")]
    MissingKey,

    /// Another process holds the database lock
    #[error("Database is locked by another process")]
    Locked,

    /// Schema setup failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A JSON column could not be encoded or decoded
    #[error("Failed to encode stored value: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Underlying I/O or driver failure
    #[error("Storage failure: {0}")]
    Io(#[source] sqlx::Error),
}

impl StorageError {
    /// Classify a driver error.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => StorageError::NotInitialized,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::DuplicateKey(db_err.message().to_string())
            }
            other => {
                // SQLITE_BUSY (5) / SQLITE_LOCKED (6)
                let message = other.to_string().to_lowercase();
                if message.contains("database is locked")
                    || message.contains("database table is locked")
                {
                    StorageError::Locked
                } else {
                    StorageError::Io(other)
                }
            }
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::from_sqlx(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// One subscribed source, keyed by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedMetadata {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub favicon: Option<String>,
    /// Epoch milliseconds of the last successful fetch
    pub last_fetched: Option<i64>,
    /// Maintained by collaborators outside the ingestion core
    pub unread_count: i64,
}

/// A media asset attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub length: i64,
}

/// One syndication item.
///
/// `id` is `None` until the store assigns it on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub id: Option<i64>,
    pub feed_url: String,
    pub guid: String,
    pub title: String,
    /// May contain HTML
    pub description: String,
    pub link: String,
    /// Epoch milliseconds
    pub pub_date: i64,
    pub author: Option<String>,
    pub categories: Option<Vec<String>>,
    pub enclosure: Option<Enclosure>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Flat row shape of the `entries` table. Converted to [`EntryRecord`] via
/// [`EntryDbRow::into_record`], which decodes the JSON `categories` column and
/// reassembles the enclosure columns.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryDbRow {
    pub id: i64,
    pub feed_url: String,
    pub guid: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub pub_date: i64,
    pub author: Option<String>,
    pub categories: Option<String>,
    pub enclosure_url: Option<String>,
    pub enclosure_type: Option<String>,
    pub enclosure_length: Option<i64>,
}

impl EntryDbRow {
    pub(crate) fn into_record(self) -> Result<EntryRecord, StorageError> {
        let categories = self
            .categories
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()?;

        let enclosure = self.enclosure_url.map(|url| Enclosure {
            url,
            mime_type: self.enclosure_type.unwrap_or_default(),
            length: self.enclosure_length.unwrap_or(0),
        });

        Ok(EntryRecord {
            id: Some(self.id),
            feed_url: self.feed_url,
            guid: self.guid,
            title: self.title,
            description: self.description,
            link: self.link,
            pub_date: self.pub_date,
            author: self.author,
            categories,
            enclosure,
        })
    }
}

/// Column list shared by every `entries` SELECT.
pub(crate) const ENTRY_COLUMNS: &str = "id, feed_url, guid, title, description, link, pub_date, \
     author, categories, enclosure_url, enclosure_type, enclosure_length";

/// Encode `categories` for its JSON column.
pub(crate) fn encode_categories(
    categories: Option<&Vec<String>>,
) -> Result<Option<String>, StorageError> {
    Ok(categories.map(serde_json::to_string).transpose()?)
}
