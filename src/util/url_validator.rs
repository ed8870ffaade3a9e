use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons a subscription URL is refused.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("Private or loopback address not allowed: {0}")]
    PrivateHost(String),
}

/// Host policy applied when validating feed URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostPolicy {
    /// Reject localhost, loopback and private address ranges (SSRF guard).
    #[default]
    PublicOnly,
    /// Accept any host. Used for self-hosted feeds and tests against local mock servers.
    AllowPrivate,
}

/// Validates a feed URL before it is subscribed or fetched.
///
/// Only `http` and `https` are accepted. Under [`HostPolicy::PublicOnly`],
/// `localhost`, loopback addresses and private/link-local ranges are refused.
///
/// # Examples
///
/// ```
/// use feedline::util::{validate_feed_url, HostPolicy};
///
/// let url = validate_feed_url("https://example.com/feed.xml", HostPolicy::PublicOnly).unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("http://127.0.0.1/feed", HostPolicy::PublicOnly).is_err());
/// assert!(validate_feed_url("http://127.0.0.1/feed", HostPolicy::AllowPrivate).is_ok());
/// assert!(validate_feed_url("file:///etc/passwd", HostPolicy::AllowPrivate).is_err());
/// ```
pub fn validate_feed_url(url_str: &str, policy: HostPolicy) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;

    if policy == HostPolicy::AllowPrivate {
        return Ok(url);
    }

    if host.eq_ignore_ascii_case("localhost") {
        return Err(UrlValidationError::PrivateHost(host.to_owned()));
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_non_public(&ip) {
            return Err(UrlValidationError::PrivateHost(ip.to_string()));
        }
    }

    Ok(url)
}

fn is_non_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_accepted() {
        assert!(validate_feed_url("https://example.com/feed.xml", HostPolicy::PublicOnly).is_ok());
        assert!(validate_feed_url("http://news.example.org/rss", HostPolicy::PublicOnly).is_ok());
        assert!(
            validate_feed_url("https://example.com:8443/atom", HostPolicy::PublicOnly).is_ok()
        );
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        let err = validate_feed_url("ftp://example.com/feed", HostPolicy::AllowPrivate).unwrap_err();
        assert!(matches!(err, UrlValidationError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = validate_feed_url("not a url", HostPolicy::AllowPrivate).unwrap_err();
        assert!(matches!(err, UrlValidationError::InvalidUrl(_)));
    }

    #[test]
    fn test_private_hosts_rejected_by_default() {
        for url in [
            "http://localhost/feed",
            "http://127.0.0.1/feed",
            "http://10.0.0.1/feed",
            "http://192.168.1.1:8080/feed",
            "http://169.254.1.1/feed",
            "http://0.0.0.0/feed",
            "http://[::1]/feed",
            "http://[fe80::1]/feed",
            "http://[fd00::1]/feed",
        ] {
            assert!(
                matches!(
                    validate_feed_url(url, HostPolicy::PublicOnly),
                    Err(UrlValidationError::PrivateHost(_))
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_allow_private_policy() {
        assert!(validate_feed_url("http://127.0.0.1:3000/feed", HostPolicy::AllowPrivate).is_ok());
        assert!(validate_feed_url("http://localhost/feed", HostPolicy::AllowPrivate).is_ok());
    }
}
