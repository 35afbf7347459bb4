//! Persistent relay cursor
//!
//! The cursor is the id of the most recently relayed source item, stored as a
//! single JSON object: `{ "last_id": "<id>" }`. A missing file or key means no
//! item has been relayed yet. Hand-written numeric ids are accepted too.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CursorError, Result};

#[derive(Debug, Default, Deserialize)]
struct CursorFile {
    #[serde(default)]
    last_id: Option<StoredId>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredId {
    Text(String),
    Number(u64),
}

impl From<StoredId> for String {
    fn from(id: StoredId) -> Self {
        match id {
            StoredId::Text(id) => id,
            StoredId::Number(id) => id.to_string(),
        }
    }
}

#[derive(Serialize)]
struct CursorFileRef<'a> {
    last_id: &'a str,
}

/// File-backed store for the relay cursor
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored cursor
    ///
    /// Returns `Ok(None)` when the file does not exist, has no `last_id`, or
    /// holds an empty id.
    ///
    /// # Errors
    ///
    /// Returns `CursorError::Read` for I/O failures other than not-found and
    /// `CursorError::Parse` for malformed JSON, including an empty file.
    pub fn load(&self) -> Result<Option<String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CursorError::Read(e).into()),
        };

        let file: CursorFile = serde_json::from_str(&content).map_err(CursorError::Parse)?;
        Ok(file.last_id.map(String::from).filter(|id| !id.is_empty()))
    }

    /// Persist `id` as the new cursor
    ///
    /// Writes a sibling temp file and renames it over the cursor file, so the
    /// previous value survives a crash mid-write.
    pub fn save(&self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(CursorError::Write)?;
            }
        }

        let body = serde_json::to_string(&CursorFileRef { last_id: id })
            .map_err(CursorError::Parse)?;

        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, body).map_err(CursorError::Write)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            CursorError::Write(e)
        })?;

        tracing::debug!(path = %self.path.display(), last_id = id, "Cursor saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "cursor".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
