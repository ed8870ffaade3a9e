//! Feed retrieval and parsing.
//!
//! - [`tree`] - generic XML element tree built on `quick-xml`
//! - [`parser`] - format detection, shared field helpers and [`ParseError`]
//! - `rss2` / `atom` - per-format field extraction with fallback rules
//! - [`fetcher`] - HTTP retrieval with retry, backoff and a size cap
//!
//! # Example
//!
//! ```
//! use feedline::feed::parse_feed;
//! use feedline::util::FixedClock;
//!
//! let raw = r#"<rss version="2.0"><channel>
//!     <title>Example</title>
//!     <item><guid>1</guid><title>Hello</title></item>
//! </channel></rss>"#;
//!
//! let parsed = parse_feed(raw, "https://example.com/rss", &FixedClock::new(0)).unwrap();
//! assert_eq!(parsed.feed.title, "Example");
//! assert_eq!(parsed.entries[0].guid, "1");
//! ```

mod atom;
pub mod fetcher;
pub mod parser;
mod rss2;
pub mod tree;

pub use fetcher::{build_client, Fetch, FetchError, FetchOptions, HttpFetcher};
pub use parser::{detect_format, parse_feed, parse_timestamp, FeedFormat, ParseError, ParsedFeed};
