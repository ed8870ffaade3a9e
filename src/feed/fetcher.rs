use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const MAX_REDIRECTS: usize = 3;

/// Query component encoding for the proxied target URL. Unreserved marks
/// `-_.!~*'()` stay literal and space becomes `%20`.
const TARGET_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Errors that can occur while retrieving a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The proxy prefix and target did not form a valid URL
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

/// Fetch collaborator: raw feed text for a URL.
///
/// The orchestrator is generic over this trait so tests can substitute a
/// stub for the network.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

impl<T: Fetch> Fetch for Arc<T> {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        (**self).fetch(url)
    }
}

/// HTTP client for feed fetches: bounded redirects with loop detection,
/// pooled connections.
pub fn build_client() -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .redirect(redirect_policy())
        .user_agent(concat!("feedline/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;
    Ok(client)
}

fn redirect_policy() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Knobs for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Request-rewriting prefix; requests go to `{proxy_url}url={encoded target}`
    pub proxy_url: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_bytes: usize,
    /// First retry delay; doubles on each further attempt
    pub backoff_base: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            proxy_url: None,
            timeout: REQUEST_TIMEOUT,
            max_retries: MAX_RETRIES,
            max_bytes: MAX_FEED_SIZE,
            backoff_base: BACKOFF_BASE,
        }
    }
}

/// HTTP fetcher with retry, backoff and a bounded body size.
///
/// - 429 and 5xx responses are retried with exponential backoff
/// - Other non-2xx responses fail immediately
/// - Bodies larger than `max_bytes` are rejected, by Content-Length when
///   present and while streaming otherwise
/// - Bodies are decoded as UTF-8, replacing invalid sequences
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, options: FetchOptions) -> Self {
        Self { client, options }
    }

    /// The URL actually requested for `target`, after proxy rewriting.
    pub fn request_url(&self, target: &str) -> String {
        match &self.options.proxy_url {
            Some(proxy) => {
                format!("{proxy}url={}", utf8_percent_encode(target, TARGET_ENCODE_SET))
            }
            None => target.to_string(),
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.options.backoff_base.saturating_mul(2u32.saturating_pow(retry))
    }

    async fn fetch_bytes(&self, target: &str) -> Result<Vec<u8>, FetchError> {
        let request_url = self.request_url(target);
        url::Url::parse(&request_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let max_retries = self.options.max_retries;
        let mut retry_count = 0;

        loop {
            // The deadline covers the body read, not just the response headers
            let result = tokio::time::timeout(self.options.timeout, self.attempt(&request_url))
                .await
                .map_err(|_| FetchError::Timeout)?;

            let delay = self.backoff(retry_count);
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::HttpStatus(429)) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::RateLimited(max_retries));
                    }
                    tracing::warn!(
                        feed = %target,
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                }
                Err(FetchError::HttpStatus(status)) if (500..600).contains(&status) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::HttpStatus(status));
                    }
                    tracing::warn!(
                        feed = %target,
                        status = status,
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Server error, retrying after delay"
                    );
                }
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    tracing::debug!(
                        feed = %target,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                }
                // 4xx and other non-success statuses fail immediately
                Err(e) => return Err(e),
            }

            tokio::time::sleep(delay).await;
            retry_count += 1;
        }
    }

    /// One request: status check and bounded body read.
    async fn attempt(&self, request_url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(request_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, self.options.max_bytes).await
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        tracing::debug!(feed = %url, bytes = bytes.len(), "Fetched feed");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn fetcher() -> HttpFetcher {
        fetcher_with(FetchOptions {
            backoff_base: Duration::from_millis(1),
            ..FetchOptions::default()
        })
    }

    fn fetcher_with(options: FetchOptions) -> HttpFetcher {
        HttpFetcher::new(reqwest::Client::new(), options)
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let body = fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_fetch_404_fails_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&format!("{}/feed", mock_server.uri())).await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&format!("{}/feed", mock_server.uri())).await;
        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        // First two requests return 503, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let body = fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_fetch_429_exhausts_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = fetcher_with(FetchOptions {
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
            ..FetchOptions::default()
        })
        .fetch(&format!("{}/feed", mock_server.uri()))
        .await;
        assert!(matches!(result, Err(FetchError::RateLimited(2))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let result = fetcher_with(FetchOptions {
            max_bytes: 1024,
            ..FetchOptions::default()
        })
        .fetch(&format!("{}/feed", mock_server.uri()))
        .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_fetch_decodes_invalid_utf8_lossily() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'<', b'a', 0xFF, b'>']))
            .mount(&mock_server)
            .await;

        let body = fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<a\u{FFFD}>");
    }

    #[tokio::test]
    async fn test_fetch_through_proxy_prefix() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxy"))
            .and(query_param("url", "https://example.com/feed.xml?a=1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_with(FetchOptions {
            proxy_url: Some(format!("{}/proxy?", mock_server.uri())),
            ..FetchOptions::default()
        });
        let body = fetcher.fetch("https://example.com/feed.xml?a=1").await.unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_build_client_follows_redirect() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("Location", format!("{}/new", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(build_client().unwrap(), FetchOptions::default());
        let body = fetcher
            .fetch(&format!("{}/old", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_build_client_rejects_redirect_loop() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/loop"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/loop", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(build_client().unwrap(), FetchOptions::default());
        let result = fetcher.fetch(&format!("{}/loop", mock_server.uri())).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[test]
    fn test_request_url_rewriting() {
        let direct = fetcher();
        assert_eq!(direct.request_url("https://e.com/f"), "https://e.com/f");

        let proxied = fetcher_with(FetchOptions {
            proxy_url: Some("https://proxy.example/?".into()),
            ..FetchOptions::default()
        });
        assert_eq!(
            proxied.request_url("https://e.com/f?x=1&y=2"),
            "https://proxy.example/?url=https%3A%2F%2Fe.com%2Ff%3Fx%3D1%26y%3D2"
        );
    }

    #[test]
    fn test_request_url_keeps_unreserved_marks() {
        let proxied = fetcher_with(FetchOptions {
            proxy_url: Some("https://proxy.example/?".into()),
            ..FetchOptions::default()
        });
        assert_eq!(
            proxied.request_url("https://e.com/a b/(x)!~*'é"),
            "https://proxy.example/?url=https%3A%2F%2Fe.com%2Fa%20b%2F(x)!~*'%C3%A9"
        );
    }

    #[tokio::test]
    async fn test_fetch_times_out_on_stalled_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n<rss")
                .await
                .unwrap();
            // Headers and a partial body, then nothing
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let fetcher = fetcher_with(FetchOptions {
            timeout: Duration::from_millis(200),
            max_retries: 0,
            ..FetchOptions::default()
        });
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            fetcher.fetch(&format!("http://{addr}/feed")),
        )
        .await
        .expect("fetch must not outlive its own timeout");
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[test]
    fn test_backoff_doubles() {
        let f = fetcher_with(FetchOptions {
            backoff_base: Duration::from_millis(10),
            ..FetchOptions::default()
        });
        assert_eq!(f.backoff(0), Duration::from_millis(10));
        assert_eq!(f.backoff(1), Duration::from_millis(20));
        assert_eq!(f.backoff(3), Duration::from_millis(80));
    }
}
