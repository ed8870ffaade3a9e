//! Persistence layer: a transactional SQLite store with three tables.
//!
//! - `feeds`: keyed by URL
//! - `entries`: keyed by a store-assigned id, indexed by `feed_url`, `guid` and `pub_date`
//! - `settings`: key/value, values stored as JSON
//!
//! Multi-row mutations (cascade delete, batch insert, fetch commit) run in a
//! single transaction under a store-wide writer lock.

mod entries;
mod feeds;
mod schema;
mod settings;
mod types;

pub use feeds::FeedWrite;
pub use schema::Database;
pub use types::{Enclosure, EntryRecord, FeedMetadata, StorageError};
