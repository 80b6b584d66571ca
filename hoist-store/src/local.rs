//! Local filesystem blob store
//!
//! Serves `file://` URIs (and bare absolute paths) off the local disk. Used
//! for local-backend staging and throughout the test suite.

use crate::error::{Result, StoreError};
use crate::{BlobStore, join_uri};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A [`BlobStore`] backed by the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalBlobStore;

impl LocalBlobStore {
    pub fn new() -> Self {
        Self
    }

    /// Resolves a `file://` URI or bare absolute path to a filesystem path
    pub fn path_of(uri: &str) -> Result<PathBuf> {
        if let Some(path) = uri.strip_prefix("file://") {
            Ok(PathBuf::from(path))
        } else if uri.starts_with('/') {
            Ok(PathBuf::from(uri))
        } else {
            Err(StoreError::UnsupportedScheme(uri.to_string()))
        }
    }

    /// The `file://` URI for a filesystem path
    pub fn uri_of(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = Self::path_of(prefix)?;
        // An unstaged prefix is an empty listing, not an error
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                entries.push(Self::uri_of(&entry.path()));
            }
        }
        entries.sort();
        Ok(entries)
    }

    async fn upload(&self, local_path: &Path, uri: &str, _content_type: &str) -> Result<String> {
        let destination = Self::path_of(uri)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!("Copying {} to {}", local_path.display(), destination.display());
        tokio::fs::copy(local_path, &destination).await?;
        Ok(Self::uri_of(&destination))
    }

    async fn download(&self, uri: &str, local_path: &Path) -> Result<()> {
        let source = Self::path_of(uri)?;
        if !source.is_file() {
            return Err(StoreError::NotFound(uri.to_string()));
        }
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!("Copying {} to {}", source.display(), local_path.display());
        tokio::fs::copy(&source, local_path).await?;
        Ok(())
    }
}
