//! Mock collaborators for testing
//!
//! Configurable stand-ins for the source fetcher, the media stager, and the
//! publisher. Each mock is `Clone` and shares its call records between
//! clones, so a test can hand one clone to `RelayService` and inspect the
//! other afterwards.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, RelayError, Result, StageError};
use crate::platforms::{ItemStream, Publisher, SourceFetcher};
use crate::staging::MediaStager;
use crate::types::SourceItem;

/// Source that yields a fixed sequence of items
#[derive(Clone, Default)]
pub struct MockSource {
    items: Vec<SourceItem>,
    fetch_error: Option<PlatformError>,
    /// Error yielded after this many items have been pulled
    stream_error: Option<(usize, PlatformError)>,
    fetch_calls: Arc<Mutex<usize>>,
    pulled: Arc<Mutex<usize>>,
}

impl MockSource {
    /// Source yielding `items` in the given (newest-first) order
    pub fn new(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// Source whose fetch fails before yielding anything
    pub fn failing(error: PlatformError) -> Self {
        Self {
            fetch_error: Some(error),
            ..Default::default()
        }
    }

    /// Yield `error` once `after` items have been pulled
    pub fn with_stream_error(mut self, after: usize, error: PlatformError) -> Self {
        self.stream_error = Some((after, error));
        self
    }

    pub fn fetch_calls(&self) -> usize {
        *self.fetch_calls.lock().unwrap()
    }

    /// Number of stream elements (items or errors) the consumer pulled
    pub fn pulled(&self) -> usize {
        *self.pulled.lock().unwrap()
    }
}

#[async_trait]
impl SourceFetcher for MockSource {
    fn name(&self) -> &str {
        "mock-source"
    }

    async fn fetch_newest(&self, _account: &str) -> Result<ItemStream> {
        *self.fetch_calls.lock().unwrap() += 1;

        if let Some(error) = &self.fetch_error {
            return Err(error.clone().into());
        }

        let mut elements: Vec<Result<SourceItem>> = self.items.iter().cloned().map(Ok).collect();
        if let Some((after, error)) = &self.stream_error {
            let at = (*after).min(elements.len());
            elements.insert(at, Err(RelayError::from(error.clone())));
        }

        let pulled = Arc::clone(&self.pulled);
        Ok(stream::iter(elements)
            .inspect(move |_| *pulled.lock().unwrap() += 1)
            .boxed())
    }

    fn permalink(&self, account: &str, id: &str) -> String {
        format!("https://source.test/{}/status/{}", account, id)
    }
}

/// Stager that writes placeholder bytes instead of downloading
#[derive(Clone, Default)]
pub struct MockStager {
    failing_urls: HashSet<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make staging of `url` fail with HTTP 404
    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    /// URLs staging was attempted for, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaStager for MockStager {
    async fn stage(&self, url: &str, dest: &Path) -> std::result::Result<PathBuf, StageError> {
        self.calls.lock().unwrap().push(url.to_string());

        if self.failing_urls.contains(url) {
            return Err(StageError::Status {
                url: url.to_string(),
                status: 404,
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, url.as_bytes()).await?;
        Ok(dest.to_path_buf())
    }
}

/// One recorded publish attempt
#[derive(Debug, Clone, PartialEq)]
pub struct PublishAttempt {
    pub text: String,
    pub media: Vec<PathBuf>,
    /// Whether every media path existed when publish was called
    pub media_present: bool,
}

#[derive(Clone)]
pub struct MockPublisher {
    error: Option<PlatformError>,
    max_attachments: usize,
    attempts: Arc<Mutex<Vec<PublishAttempt>>>,
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self {
            error: None,
            max_attachments: 9,
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockPublisher {
    /// Publisher that always succeeds
    pub fn success() -> Self {
        Self::default()
    }

    /// Publisher that always fails with `error`
    pub fn failure(error: PlatformError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_max_attachments(mut self, max: usize) -> Self {
        self.max_attachments = max;
        self
    }

    pub fn attempts(&self) -> Vec<PublishAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        "mock-publisher"
    }

    fn max_attachments(&self) -> usize {
        self.max_attachments
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn publish(&self, text: &str, media: &[PathBuf]) -> Result<String> {
        let attempt = PublishAttempt {
            text: text.to_string(),
            media: media.to_vec(),
            media_present: media.iter().all(|p| p.exists()),
        };
        let number = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(attempt);
            attempts.len()
        };

        match &self.error {
            Some(error) => Err(error.clone().into()),
            None => Ok(format!("mock-post-{}", number)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mock_source_yields_items_in_order() {
        let source = MockSource::new(vec![SourceItem::new("2", "b"), SourceItem::new("1", "a")]);
        let items: Vec<SourceItem> = source
            .fetch_newest("someone")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "2");
        assert_eq!(source.fetch_calls(), 1);
        assert_eq!(source.pulled(), 2);
    }

    #[tokio::test]
    async fn test_mock_source_failures() {
        let failing = MockSource::failing(PlatformError::Authentication("expired".to_string()));
        assert!(failing.fetch_newest("someone").await.is_err());

        let broken = MockSource::new(vec![SourceItem::new("2", "b"), SourceItem::new("1", "a")])
            .with_stream_error(1, PlatformError::Network("reset".to_string()));
        let mut stream = broken.fetch_newest("someone").await.unwrap();
        assert!(stream.try_next().await.unwrap().is_some());
        assert!(stream.try_next().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_stager_writes_and_fails() {
        let dir = TempDir::new().unwrap();
        let stager = MockStager::new().failing_on("https://img/bad.jpg");

        let dest = dir.path().join("sub").join("a.jpg");
        let path = stager.stage("https://img/a.jpg", &dest).await.unwrap();
        assert!(path.exists());

        let result = stager.stage("https://img/bad.jpg", &dir.path().join("b.jpg")).await;
        assert!(matches!(result, Err(StageError::Status { status: 404, .. })));
        assert_eq!(stager.calls(), vec!["https://img/a.jpg", "https://img/bad.jpg"]);
    }

    #[tokio::test]
    async fn test_mock_publisher_records_attempts() {
        let publisher = MockPublisher::success();
        let shared = publisher.clone();

        let id = publisher.publish("hello", &[]).await.unwrap();
        assert_eq!(id, "mock-post-1");
        assert_eq!(shared.attempt_count(), 1);
        assert_eq!(shared.attempts()[0].text, "hello");

        let failing = MockPublisher::failure(PlatformError::Posting("rejected".to_string()));
        let err = failing.publish("hello", &[]).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(failing.attempt_count(), 1);
    }
}
