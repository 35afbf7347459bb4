//! Source and destination platform abstractions
//!
//! A relay run talks to two platforms through two traits:
//!
//! - [`SourceFetcher`] yields the source account's posts newest-first as a
//!   lazy stream, so the caller can stop pulling once it has seen enough.
//! - [`Publisher`] creates one post on the destination platform from text
//!   plus already-downloaded media files.
//!
//! Which implementation backs each trait is decided once, from
//! configuration, by [`create_source`] and [`create_publisher`].
//!
//! # Examples
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use libcrossrelay::platforms::{create_source, SourceFetcher};
//! use libcrossrelay::Config;
//!
//! # async fn example() -> libcrossrelay::Result<()> {
//! let config = Config::from_env()?;
//! let source = create_source(&config)?;
//!
//! let mut items = source.fetch_newest(&config.target_account).await?;
//! if let Some(item) = items.try_next().await? {
//!     println!("newest: {}", source.permalink(&config.target_account, &item.id));
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;

use crate::config::{Config, SourceAuth};
use crate::error::{ConfigError, Result};
use crate::types::SourceItem;

pub mod bilibili;
pub mod feed;
pub mod x;

// Mock platforms are available for all builds (not just tests) to support integration tests
pub mod mock;

/// Newest-first stream of source items
///
/// Finite, and safe to drop before exhaustion.
pub type ItemStream = BoxStream<'static, Result<SourceItem>>;

/// Browser-like user agent for scraping and media downloads
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Lowercase identifier used in logs (e.g. "x-session", "x-feed")
    fn name(&self) -> &str;

    /// Start fetching the account's posts, newest first
    ///
    /// Work that can fail up front (account lookup, first request) should
    /// happen here so that authentication problems surface before any item
    /// is yielded. Later pages are requested only as the stream is polled.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Authentication` when session material is rejected
    /// - `PlatformError::RateLimit` when the platform throttles the client
    /// - `PlatformError::Fetch` / `PlatformError::Network` otherwise
    async fn fetch_newest(&self, account: &str) -> Result<ItemStream>;

    /// Public URL of a source item
    fn permalink(&self, account: &str, id: &str) -> String {
        format!("https://x.com/{}/status/{}", account, id)
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Lowercase identifier used in logs (e.g. "bilibili")
    fn name(&self) -> &str;

    /// Maximum number of images per post
    fn max_attachments(&self) -> usize {
        9
    }

    /// Whether all credentials needed to publish are present
    fn is_configured(&self) -> bool;

    /// Create a single post with `text` and the images at `media`
    ///
    /// All-or-nothing as observed on the destination: either the whole post
    /// exists afterwards or nothing does.
    ///
    /// # Returns
    ///
    /// The destination platform's id for the new post.
    async fn publish(&self, text: &str, media: &[PathBuf]) -> Result<String>;
}

/// Build the source fetcher selected by `config.source.auth`
pub fn create_source(config: &Config) -> Result<Box<dyn SourceFetcher>> {
    let source: Box<dyn SourceFetcher> = match &config.source.auth {
        SourceAuth::Session { .. } => Box::new(x::XSessionSource::from_config(&config.source)?),
        SourceAuth::Anonymous { feed_url } => {
            Box::new(feed::FeedSource::new(feed_url, config.source.page_size)?)
        }
    };
    tracing::debug!(source = source.name(), "Source fetcher created");
    Ok(source)
}

/// Build the destination publisher
pub fn create_publisher(config: &Config) -> Result<Box<dyn Publisher>> {
    let publisher = bilibili::BilibiliPublisher::from_config(&config.destination)?;
    if !publisher.is_configured() {
        return Err(ConfigError::MissingField("destination session cookies".to_string()).into());
    }
    Ok(Box::new(publisher))
}
