//! Media staging
//!
//! Downloads remote media to local scratch files before publishing. Staging
//! is best-effort: each failure is returned as a value and the caller decides
//! to drop that attachment.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StageError;
use crate::platforms::BROWSER_USER_AGENT;
use crate::types::{ImageMimeType, StagedMedia};

#[async_trait]
pub trait MediaStager: Send + Sync {
    /// Download `url` into `dest`, returning the path written
    async fn stage(&self, url: &str, dest: &Path) -> Result<PathBuf, StageError>;
}

/// Stager that downloads over HTTP with a browser-like user agent
pub struct HttpStager {
    client: reqwest::Client,
}

impl HttpStager {
    pub fn new(accept_invalid_certs: bool) -> Result<Self, StageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(BROWSER_USER_AGENT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| StageError::Request {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaStager for HttpStager {
    async fn stage(&self, url: &str, dest: &Path) -> Result<PathBuf, StageError> {
        let request_error = |e: reqwest::Error| StageError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(StageError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(request_error)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        tracing::debug!(url, path = %dest.display(), bytes = bytes.len(), "Staged media");
        Ok(dest.to_path_buf())
    }
}

/// Scratch file name for the `index`-th media entry of an item
///
/// The item id is reduced to filename-safe characters; the extension comes
/// from the URL and defaults to `jpg`.
pub fn staged_file_name(item_id: &str, index: usize, url: &str) -> String {
    let safe_id: String = item_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let ext = ImageMimeType::from_url(url)
        .unwrap_or(ImageMimeType::Jpeg)
        .extension();
    format!("relay_{}_{}.{}", safe_id, index, ext)
}

/// Delete staged files, logging failures instead of returning them
pub async fn cleanup(staged: &[StagedMedia]) {
    for media in staged {
        match tokio::fs::remove_file(&media.local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %media.local_path.display(),
                error = %e,
                "Failed to remove staged media"
            ),
        }
    }
}
