//! Single-flight upload memoization
//!
//! Repeated submissions stage the same dependency files to the same prefix.
//! The cache keys on `(destination prefix, local path)` and guarantees
//! at-most-one upload per key: concurrent callers for an in-flight key await
//! the same result instead of starting a second transfer. Failed uploads are
//! not cached, so a later caller can retry.

use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

type Key = (String, PathBuf);

/// Memoizes upload results per `(destination prefix, local path)` key
pub struct UploadCache<T> {
    entries: Mutex<HashMap<Key, Arc<OnceCell<T>>>>,
}

impl<T: Clone> UploadCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached result for the key, or runs `upload` to produce it
    ///
    /// The per-key cell is registered before the upload starts, so a second
    /// caller arriving mid-flight observes the cell and awaits the first
    /// caller's result rather than uploading again.
    pub async fn get_or_upload<F, Fut>(&self, prefix: &str, path: &Path, upload: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry((prefix.to_string(), path.to_path_buf()))
                .or_default()
                .clone()
        };
        let value = cell.get_or_try_init(upload).await?;
        Ok(value.clone())
    }
}

impl<T: Clone> Default for UploadCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_upload() {
        let cache = Arc::new(UploadCache::<String>::new());
        let uploads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let uploads = Arc::clone(&uploads);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_upload("gs://bucket/staging", Path::new("/tmp/lib1.jar"), || async {
                        uploads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("gs://bucket/staging/lib1.jar".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "gs://bucket/staging/lib1.jar");
        }
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_upload_independently() {
        let cache = UploadCache::<String>::new();
        let a = cache
            .get_or_upload("gs://a", Path::new("/tmp/lib.jar"), || async {
                Ok("gs://a/lib.jar".to_string())
            })
            .await
            .unwrap();
        let b = cache
            .get_or_upload("gs://b", Path::new("/tmp/lib.jar"), || async {
                Ok("gs://b/lib.jar".to_string())
            })
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn failed_uploads_are_not_cached() {
        let cache = UploadCache::<String>::new();
        let key = Path::new("/tmp/lib.jar");

        let err = cache
            .get_or_upload("gs://bucket", key, || async {
                Err::<String, _>(StoreError::NotFound("transient".to_string()))
            })
            .await;
        assert!(err.is_err());

        let ok = cache
            .get_or_upload("gs://bucket", key, || async {
                Ok("gs://bucket/lib.jar".to_string())
            })
            .await
            .unwrap();
        assert_eq!(ok, "gs://bucket/lib.jar");
    }
}
