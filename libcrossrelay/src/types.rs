//! Core types for Crossrelay

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One upstream post, as yielded by a source fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    /// Opaque, stable identifier. Only compared for equality.
    pub id: String,
    pub text: String,
    pub is_repost: bool,
    pub media: Vec<MediaRef>,
    pub created_at: Option<DateTime<Utc>>,
}

impl SourceItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_repost: false,
            media: Vec::new(),
            created_at: None,
        }
    }

    pub fn repost(mut self) -> Self {
        self.is_repost = true;
        self
    }

    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }

    /// Photo URLs in their original order
    pub fn photo_urls(&self) -> impl Iterator<Item = &str> {
        self.media
            .iter()
            .filter(|m| m.kind == MediaKind::Photo)
            .map(|m| m.url.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn photo(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Photo,
        }
    }

    pub fn other(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Other,
}

impl MediaKind {
    /// Classify a source payload media type string ("photo", "video", "animated_gif", ...)
    pub fn from_source_type(s: &str) -> Self {
        if s.eq_ignore_ascii_case("photo") {
            MediaKind::Photo
        } else {
            MediaKind::Other
        }
    }
}

/// A media file downloaded to local scratch storage ahead of publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMedia {
    pub source_url: String,
    pub local_path: PathBuf,
}

// ============================================================================
// Attachment Types
// ============================================================================

/// Supported image MIME types for staged attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageMimeType {
    /// Detect MIME type from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detect MIME type from a media URL, ignoring query strings and fragments
    ///
    /// Falls back to the `format=` query parameter used by image CDNs
    /// (e.g. `.../media/abc?format=png&name=large`).
    pub fn from_url(url: &str) -> Option<Self> {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        let path = path.split('#').next().unwrap_or(path);

        let from_path = path
            .rsplit('/')
            .next()
            .and_then(|segment| segment.rsplit_once('.'))
            .and_then(|(_, ext)| Self::from_extension(ext));

        from_path.or_else(|| {
            query?
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "format")
                .and_then(|(_, value)| Self::from_extension(value))
        })
    }

    /// Get the MIME type string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    /// Get the typical file extension for this MIME type
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

impl std::fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage of the relay pipeline at which a run gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    CursorLoad,
    Fetch,
    Publish,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CursorLoad => write!(f, "cursor-load"),
            Self::Fetch => write!(f, "fetch"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

/// Result of a single relay run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Nothing newer than the cursor (or only reposts)
    NoNewItem,
    /// The candidate was published.
    ///
    /// `cursor_persisted == false` means the post exists on the destination
    /// but the cursor still points at the previous item.
    Relayed {
        item_id: String,
        post_id: String,
        cursor_persisted: bool,
    },
    /// The run stopped early; the cursor is unchanged
    RelayFailed { stage: FailureStage, reason: String },
}

impl RelayOutcome {
    pub fn is_relayed(&self) -> bool {
        matches!(self, RelayOutcome::Relayed { .. })
    }
}
