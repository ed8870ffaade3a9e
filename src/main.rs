use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedline::config::Config;
use feedline::feed::{build_client, HttpFetcher};
use feedline::ingest::{IngestError, Ingestor};
use feedline::storage::{Database, StorageError};
use feedline::util::SystemClock;

/// Get the config directory path (~/.config/feedline/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedline"))
}

#[derive(Parser, Debug)]
#[command(name = "feedline", version, about = "RSS and Atom feed ingester")]
struct Args {
    /// Config file (default: ~/.config/feedline/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and store its entries
    Add { url: String },
    /// Unsubscribe from a feed and delete its entries
    Remove { url: String },
    /// Fetch new entries for one feed, or for all feeds
    Refresh { url: Option<String> },
    /// List subscribed feeds
    List,
    /// Show stored entries, newest first
    Entries {
        /// Only entries of this feed
        #[arg(long)]
        feed: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::debug!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.resolve_database_path(&config_dir);
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StorageError::Locked) => {
            eprintln!("Error: The database is locked by another process. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = build_client().context("Failed to build HTTP client")?;
    let fetcher = HttpFetcher::new(client, config.fetch_options());
    let ingestor = Ingestor::new(db.clone(), fetcher, SystemClock)
        .with_host_policy(config.host_policy())
        .with_concurrency(config.refresh_concurrency);

    let outcome = run(&ingestor, args.command).await;
    db.close().await;
    outcome
}

async fn run(ingestor: &Ingestor<HttpFetcher, SystemClock>, command: Command) -> Result<()> {
    match command {
        Command::Add { url } => match ingestor.add_feed(&url).await {
            Ok(feed) => {
                let count = ingestor.entries_for_feed(&feed.url).await.len();
                println!("Added \"{}\" ({} entries)", feed.title, count);
            }
            Err(IngestError::AlreadySubscribed(url)) => {
                println!("Already subscribed to {}", url);
            }
            Err(e) => return Err(e).context("Failed to add feed"),
        },

        Command::Remove { url } => {
            ingestor.remove_feed(&url).await.context("Failed to remove feed")?;
            println!("Removed {}", url);
        }

        Command::Refresh { url: Some(url) } => {
            let inserted = ingestor
                .refresh_feed(&url)
                .await
                .with_context(|| format!("Failed to refresh {}", url))?;
            println!("{} new entries", inserted);
        }

        Command::Refresh { url: None } => {
            let report = ingestor.refresh_all().await.context("Failed to refresh feeds")?;
            println!("{} new entries", report.inserted);
            for (url, error) in &report.failures {
                eprintln!("  {}: {}", url, error);
            }
            if !report.is_success() {
                anyhow::bail!("{} feed(s) failed to refresh", report.failures.len());
            }
        }

        Command::List => {
            let feeds = ingestor.get_feeds().await.context("Failed to load feeds")?;
            if feeds.is_empty() {
                println!("No feeds. Subscribe with: feedline add <url>");
            }
            for feed in feeds {
                println!(
                    "{}\n  {}  (last fetched: {})",
                    feed.title,
                    feed.url,
                    format_time(feed.last_fetched)
                );
            }
        }

        Command::Entries { feed, limit } => {
            let entries = match feed {
                Some(url) => {
                    let mut entries = ingestor
                        .get_entries(Some(&url))
                        .await
                        .context("Failed to load entries")?;
                    entries.truncate(limit);
                    entries
                }
                None => ingestor
                    .database()
                    .get_recent_entries(limit)
                    .await
                    .context("Failed to load entries")?,
            };
            for entry in entries {
                println!("{}  {}", format_time(Some(entry.pub_date)), entry.title);
                if !entry.link.is_empty() {
                    println!("    {}", entry.link);
                }
            }
        }
    }

    Ok(())
}

fn format_time(millis: Option<i64>) -> String {
    millis
        .and_then(|m| Utc.timestamp_millis_opt(m).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}
