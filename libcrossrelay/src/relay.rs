//! Relay orchestration
//!
//! One call to [`RelayService::run`] performs one relay pass:
//!
//! 1. load the cursor
//! 2. fetch the source timeline and pick the newest novel item
//! 3. format the text and stage its photos
//! 4. publish
//! 5. only after a confirmed publish, persist the cursor and remove staged files
//!
//! Every collaborator failure is converted into a [`RelayOutcome`]; `run`
//! never returns an error. A failed publish leaves the cursor untouched, so
//! the next scheduled run retries the same item.

use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::cursor::CursorStore;
use crate::error::Result;
use crate::filter::next_candidate;
use crate::platforms::{create_publisher, create_source, Publisher, SourceFetcher};
use crate::staging::{cleanup, staged_file_name, HttpStager, MediaStager};
use crate::types::{FailureStage, RelayOutcome, SourceItem, StagedMedia};

/// Upper bound on images attached to one relayed post
pub const MAX_RELAY_MEDIA: usize = 9;

/// Text of the relayed post: original body, backlink, and a sync marker
pub fn format_relay_text(text: &str, permalink: &str) -> String {
    format!("{}\n\nSource: {}\n(auto-synced)", text, permalink)
}

pub struct RelayService {
    source: Box<dyn SourceFetcher>,
    stager: Box<dyn MediaStager>,
    publisher: Box<dyn Publisher>,
    cursor: CursorStore,
    target_account: String,
    scratch_dir: PathBuf,
}

impl RelayService {
    pub fn new(
        source: Box<dyn SourceFetcher>,
        stager: Box<dyn MediaStager>,
        publisher: Box<dyn Publisher>,
        cursor: CursorStore,
        target_account: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            stager,
            publisher,
            cursor,
            target_account: target_account.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Wire up the configured source, HTTP stager, and publisher
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = create_source(config)?;
        let publisher = create_publisher(config)?;
        let stager = HttpStager::new(config.staging.accept_invalid_certs)?;

        Ok(Self::new(
            source,
            Box::new(stager),
            publisher,
            CursorStore::new(config.cursor_path()),
            config.target_account.clone(),
            config.scratch_path(),
        ))
    }

    pub fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    /// Perform one relay pass
    pub async fn run(&self) -> RelayOutcome {
        let cursor = match self.cursor.load() {
            Ok(cursor) => cursor,
            Err(e) => {
                error!(
                    path = %self.cursor.path().display(),
                    error = %e,
                    "Cannot read relay cursor; refusing to run"
                );
                return failed(FailureStage::CursorLoad, e);
            }
        };
        debug!(cursor = cursor.as_deref().unwrap_or("<none>"), "Loaded cursor");

        let candidate = match self.select_candidate(cursor.as_deref()).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                info!(account = %self.target_account, "No new original post to relay");
                return RelayOutcome::NoNewItem;
            }
            Err(e) => {
                error!(source = self.source.name(), error = %e, "Fetching source posts failed");
                return failed(FailureStage::Fetch, e);
            }
        };
        info!(id = %candidate.id, "Selected post to relay");

        let permalink = self.source.permalink(&self.target_account, &candidate.id);
        let text = format_relay_text(&candidate.text, &permalink);

        let staged = self.stage_photos(&candidate).await;
        let limit = MAX_RELAY_MEDIA.min(self.publisher.max_attachments());
        let media: Vec<PathBuf> = staged
            .iter()
            .take(limit)
            .map(|m| m.local_path.clone())
            .collect();

        let post_id = match self.publisher.publish(&text, &media).await {
            Ok(post_id) => post_id,
            Err(e) => {
                // Staged files stay behind; the next run stages afresh
                error!(
                    publisher = self.publisher.name(),
                    id = %candidate.id,
                    error = %e,
                    "Publishing failed; cursor not advanced"
                );
                return failed(FailureStage::Publish, e);
            }
        };
        info!(
            publisher = self.publisher.name(),
            id = %candidate.id,
            post_id = %post_id,
            attachments = media.len(),
            "Published relayed post"
        );

        let cursor_persisted = match self.cursor.save(&candidate.id) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    critical = true,
                    id = %candidate.id,
                    post_id = %post_id,
                    path = %self.cursor.path().display(),
                    error = %e,
                    "Post was published but the cursor could not be saved; the next run may relay it again"
                );
                false
            }
        };

        cleanup(&staged).await;

        RelayOutcome::Relayed {
            item_id: candidate.id,
            post_id,
            cursor_persisted,
        }
    }

    async fn select_candidate(&self, cursor: Option<&str>) -> Result<Option<SourceItem>> {
        let items = self.source.fetch_newest(&self.target_account).await?;
        next_candidate(items, cursor).await
    }

    /// Stage every photo of `item`, dropping the ones that fail
    async fn stage_photos(&self, item: &SourceItem) -> Vec<StagedMedia> {
        let mut staged = Vec::new();

        for (index, url) in item.photo_urls().enumerate() {
            let dest = self
                .scratch_dir
                .join(staged_file_name(&item.id, index, url));

            match self.stager.stage(url, &dest).await {
                Ok(local_path) => staged.push(StagedMedia {
                    source_url: url.to_string(),
                    local_path,
                }),
                Err(e) => warn!(url, error = %e, "Skipping media that could not be staged"),
            }
        }

        staged
    }
}

fn failed(stage: FailureStage, error: impl std::fmt::Display) -> RelayOutcome {
    RelayOutcome::RelayFailed {
        stage,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_relay_text() {
        assert_eq!(
            format_relay_text("hello world", "https://x.com/someone/status/5"),
            "hello world\n\nSource: https://x.com/someone/status/5\n(auto-synced)"
        );
    }

    #[test]
    fn test_format_relay_text_empty_body() {
        assert_eq!(
            format_relay_text("", "https://x.com/someone/status/5"),
            "\n\nSource: https://x.com/someone/status/5\n(auto-synced)"
        );
    }
}
