//! feedline: RSS 2.0 / Atom ingestion with deduplicated SQLite persistence.
//!
//! - [`feed`] - fetch collaborator, document tree and per-format extraction
//! - [`identity`] - entry identity and insert-vs-skip resolution
//! - [`storage`] - transactional feeds/entries/settings store
//! - [`ingest`] - orchestration of fetch, parse and store
//! - [`config`] - TOML configuration
//! - [`util`] - clock and URL validation

pub mod config;
pub mod feed;
pub mod identity;
pub mod ingest;
pub mod storage;
pub mod util;
