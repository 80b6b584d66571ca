//! Hoist Store
//!
//! Blob-storage boundary and staging coordinator for the hoist remote
//! execution system.
//!
//! This crate provides:
//! - [`BlobStore`]: the trait every backing store implements
//!   (list/upload/download)
//! - [`LocalBlobStore`]: a `file://` implementation backed by the local
//!   filesystem
//! - [`Stager`]: content-addressed upload of classpath elements and
//!   manifest-driven download of a staged run
//! - [`UploadCache`]: single-flight memoization of repeated uploads of the
//!   same local file to the same destination prefix

pub mod error;
mod local;
mod staging;
mod upload_cache;

pub use error::{Result, StoreError};
pub use local::LocalBlobStore;
pub use staging::{StagedPackage, Stager};
pub use upload_cache::UploadCache;

use async_trait::async_trait;
use std::path::Path;

/// A blob storage collaborator
///
/// Implementations are assumed to offer strongly consistent list-after-write;
/// the staging coordinator nevertheless prefers explicit file lists (the
/// manifest) over prefix listing wherever it can.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Lists object URIs under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Uploads a local file to the given URI, returning the final object URI
    async fn upload(&self, local_path: &Path, uri: &str, content_type: &str) -> Result<String>;

    /// Downloads the object at `uri` into `local_path`
    async fn download(&self, uri: &str, local_path: &Path) -> Result<()>;
}

/// Joins a URI prefix and a file name with exactly one separating slash
pub fn join_uri(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

/// The last path segment of a URI
pub(crate) fn uri_file_name(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
}

/// Replaces the last path segment of a URI, resolving `name` as a sibling
pub(crate) fn sibling_uri(uri: &str, name: &str) -> String {
    match uri.rsplit_once('/') {
        Some((parent, _)) => format!("{parent}/{name}"),
        None => name.to_string(),
    }
}
