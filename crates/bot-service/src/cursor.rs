//! Persisted sync cursor.
//!
//! The cursor is a single opaque token stored as text. The file is created
//! by the deployment (or the binary at startup); `save` never creates it, so
//! removing the file disables persistence.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Failed to read cursor file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write cursor file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Text-file store for the sync cursor.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored cursor.
    ///
    /// A missing file or blank content yields `None`. Surrounding whitespace
    /// is trimmed.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Option<String>, CursorError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    debug!(target: "bot.cursor", "Cursor file is empty");
                    Ok(None)
                } else {
                    debug!(target: "bot.cursor", "Loaded sync cursor");
                    Ok(Some(token.to_string()))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(target: "bot.cursor", "No cursor file, starting without cursor");
                Ok(None)
            }
            Err(source) => Err(CursorError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Overwrite the stored cursor.
    ///
    /// Returns `Ok(false)` without writing when the file does not exist.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, token: &str) -> Result<bool, CursorError> {
        match tokio::fs::try_exists(&self.path).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: "bot.cursor", "Cursor file absent, not persisting");
                return Ok(false);
            }
            Err(source) => {
                return Err(CursorError::Write {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        tokio::fs::write(&self.path, token)
            .await
            .map_err(|source| CursorError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!(target: "bot.cursor", "Persisted sync cursor");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join(".next_batch"));

        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_blank_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".next_batch");
        std::fs::write(&path, "  \n").unwrap();

        let store = CursorStore::new(path);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".next_batch");
        std::fs::write(&path, "s72594_4483_1934\n").unwrap();

        let store = CursorStore::new(path);
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some("s72594_4483_1934")
        );
    }

    #[tokio::test]
    async fn test_save_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".next_batch");
        std::fs::write(&path, "old_token").unwrap();

        let store = CursorStore::new(&path);
        assert!(store.save("new_token").await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new_token");
        assert_eq!(store.load().await.unwrap().as_deref(), Some("new_token"));
    }

    #[tokio::test]
    async fn test_save_without_file_does_not_create_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".next_batch");

        let store = CursorStore::new(&path);
        assert!(!store.save("token").await.unwrap());
        assert!(!path.exists());
    }
}
