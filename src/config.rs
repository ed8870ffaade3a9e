//! Configuration file parser for ~/.config/feedline/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchOptions;
use crate::util::HostPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks credentials embedded in `proxy_url`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Request-rewriting prefix for feed fetches, e.g. `https://proxy.example/?`.
    /// Requests go to `{proxy_url}url={percent-encoded feed url}`.
    pub proxy_url: Option<String>,

    /// SQLite database file. Defaults to `feedline.db` next to the config file.
    pub database_path: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retries for 429, 5xx and truncated responses.
    pub max_retries: u32,

    /// Maximum feed document size in bytes.
    pub max_feed_bytes: usize,

    /// Feeds fetched in parallel by `refresh`.
    pub refresh_concurrency: usize,

    /// Allow subscribing to loopback and private-network hosts.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_url: None,
            database_path: None,
            request_timeout_secs: 30,
            max_retries: 3,
            max_feed_bytes: 10 * 1024 * 1024,
            refresh_concurrency: 4,
            allow_private_hosts: false,
        }
    }
}

/// SEC-015: Mask proxy credentials in Debug output.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("proxy_url", &self.proxy_url.as_deref().map(redact_credentials))
            .field("database_path", &self.database_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("max_feed_bytes", &self.max_feed_bytes)
            .field("refresh_concurrency", &self.refresh_concurrency)
            .field("allow_private_hosts", &self.allow_private_hosts)
            .finish()
    }
}

fn redact_credentials(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            format!("{parsed} (credentials [REDACTED])")
        }
        Ok(_) => raw.to_string(),
        Err(_) => "[UNPARSEABLE]".to_string(),
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "proxy_url",
        "database_path",
        "request_timeout_secs",
        "max_retries",
        "max_feed_bytes",
        "refresh_concurrency",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            path = %path.display(),
            proxied = config.proxy_url.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Database location: `database_path` if set, else `feedline.db` in `config_dir`.
    pub fn resolve_database_path(&self, config_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(p) => PathBuf::from(p),
            None => config_dir.join("feedline.db"),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            proxy_url: self.proxy_url.clone().filter(|p| !p.trim().is_empty()),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_retries: self.max_retries,
            max_bytes: self.max_feed_bytes,
            ..FetchOptions::default()
        }
    }

    pub fn host_policy(&self) -> HostPolicy {
        if self.allow_private_hosts {
            HostPolicy::AllowPrivate
        } else {
            HostPolicy::PublicOnly
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
