//! Small shared utilities.
//!
//! - **Clock**: injectable wall-clock source used for timestamp fallbacks
//! - **URL validation**: scheme and SSRF checks for subscription URLs

mod clock;
mod url_validator;

pub use clock::{Clock, FixedClock, SystemClock};
pub use url_validator::{validate_feed_url, HostPolicy, UrlValidationError};
