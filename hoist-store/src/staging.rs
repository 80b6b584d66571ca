//! Staging coordinator
//!
//! Uploads classpath elements to a staging prefix with content-addressed
//! deduplication, and downloads the file set referenced by a manifest into a
//! destination directory. Both directions fan out across a bounded worker
//! pool and fail as a whole on the first error; there is no partial-manifest
//! success state.

use crate::error::{Result, StoreError};
use crate::{BlobStore, join_uri, sibling_uri, uri_file_name};
use hoist_core::RunManifest;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};
use uuid::Uuid;

/// How many transfers may be in flight at once
const DEFAULT_CONCURRENCY: usize = 32;

/// How many hex digits of the content digest go into a staged file name
const HASH_LEN: usize = 22;

/// A file that has been uploaded to the staging prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPackage {
    /// Staged file name, `{stem}-{content-hash}{ext}`
    pub name: String,
    /// Full object URI of the staged file
    pub location: String,
}

/// Coordinates uploads to and downloads from a staging location
#[derive(Clone)]
pub struct Stager {
    store: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl Stager {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Stages one local file under the staging prefix
    ///
    /// The staged name embeds a digest of the file contents, so a file that
    /// is already present under the prefix is detected and not re-uploaded.
    pub async fn stage_file(&self, path: &Path, staging_prefix: &str) -> Result<StagedPackage> {
        let existing = self.existing_names(staging_prefix).await?;
        stage_one(&self.store, path.to_path_buf(), staging_prefix.to_string(), &existing).await
    }

    /// Stages a set of local files under the staging prefix
    ///
    /// Lists the prefix once, then uploads only the files whose staged name
    /// is not already present, bounded by the configured concurrency. Any
    /// single failure fails the whole call. Returned packages are in input
    /// order.
    pub async fn stage_classpath_elements(
        &self,
        files: &[PathBuf],
        staging_prefix: &str,
    ) -> Result<Vec<StagedPackage>> {
        let existing = Arc::new(self.existing_names(staging_prefix).await?);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut tasks = JoinSet::new();
        for (index, path) in files.iter().cloned().enumerate() {
            let store = Arc::clone(&self.store);
            let existing = Arc::clone(&existing);
            let semaphore = Arc::clone(&semaphore);
            let prefix = staging_prefix.to_string();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StoreError::TaskFailed(e.to_string()))?;
                let package = stage_one(&store, path, prefix, &existing).await?;
                Ok::<_, StoreError>((index, package))
            });
        }

        let mut staged: Vec<Option<StagedPackage>> = vec![None; files.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, package) = joined.map_err(|e| StoreError::TaskFailed(e.to_string()))??;
            staged[index] = Some(package);
        }

        info!("Staged {} file(s) to {}", files.len(), staging_prefix);
        Ok(staged.into_iter().flatten().collect())
    }

    /// Writes and uploads a manifest, returning its object URI
    pub async fn upload_manifest(
        &self,
        manifest: &RunManifest,
        destination_uri: &str,
    ) -> Result<String> {
        let scratch = std::env::temp_dir().join(format!("hoist-manifest-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&scratch, manifest.serialize()).await?;
        let uploaded = self.store.upload(&scratch, destination_uri, "text/plain").await;
        let _ = tokio::fs::remove_file(&scratch).await;
        uploaded
    }

    /// Downloads the file set referenced by a manifest into `destination_dir`
    ///
    /// Every entry is resolved as a sibling of the manifest's own location,
    /// the resolved set is deduplicated, and each file is fetched exactly
    /// once, named by its file name. Any single fetch failure fails the
    /// whole call.
    pub async fn download_manifest(
        &self,
        manifest_uri: &str,
        destination_dir: &Path,
    ) -> Result<RunManifest> {
        let scratch = std::env::temp_dir().join(format!("hoist-manifest-{}", Uuid::new_v4().simple()));
        self.store.download(manifest_uri, &scratch).await?;
        let text = tokio::fs::read_to_string(&scratch).await?;
        let _ = tokio::fs::remove_file(&scratch).await;
        let manifest = RunManifest::parse(&text)?;

        // Dedup by resolved URI, preserving first insertion
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for name in manifest.entries() {
            let uri = sibling_uri(manifest_uri, name);
            if seen.insert(uri.clone()) {
                entries.push(uri);
            }
        }

        tokio::fs::create_dir_all(destination_dir).await?;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for uri in entries {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let destination = destination_dir.join(uri_file_name(&uri));
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StoreError::TaskFailed(e.to_string()))?;
                debug!("Fetching {} to {}", uri, destination.display());
                store.download(&uri, &destination).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| StoreError::TaskFailed(e.to_string()))??;
        }

        Ok(manifest)
    }

    async fn existing_names(&self, staging_prefix: &str) -> Result<HashSet<String>> {
        Ok(self
            .store
            .list(staging_prefix)
            .await?
            .iter()
            .map(|uri| uri_file_name(uri).to_string())
            .collect())
    }
}

async fn stage_one(
    store: &Arc<dyn BlobStore>,
    path: PathBuf,
    staging_prefix: String,
    existing: &HashSet<String>,
) -> Result<StagedPackage> {
    let name = staged_name(&path).await?;
    let uri = join_uri(&staging_prefix, &name);

    if existing.contains(&name) {
        debug!("{} already staged as {}", path.display(), name);
        return Ok(StagedPackage { name, location: uri });
    }

    let location = store
        .upload(&path, &uri, "application/octet-stream")
        .await?;
    Ok(StagedPackage { name, location })
}

/// The staged name of a local file, `{stem}-{content-hash}{ext}`
async fn staged_name(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let digest = Sha256::digest(&bytes);
    let mut hash = String::with_capacity(HASH_LEN);
    for byte in digest.iter() {
        hash.push_str(&format!("{byte:02x}"));
        if hash.len() >= HASH_LEN {
            break;
        }
    }
    hash.truncate(HASH_LEN);

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    Ok(format!("{stem}-{hash}{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalBlobStore;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store that counts transfer calls
    #[derive(Default)]
    struct CountingStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        uploads: AtomicUsize,
        downloads: AtomicUsize,
        fail_uploads: bool,
    }

    #[async_trait::async_trait]
    impl BlobStore for CountingStore {
        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            let objects = self.objects.lock().unwrap();
            Ok(objects.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
        }

        async fn upload(&self, local_path: &Path, uri: &str, _ct: &str) -> Result<String> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail_uploads {
                return Err(StoreError::NotFound("upload rejected".to_string()));
            }
            let bytes = tokio::fs::read(local_path).await?;
            self.objects.lock().unwrap().insert(uri.to_string(), bytes);
            Ok(uri.to_string())
        }

        async fn download(&self, uri: &str, local_path: &Path) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let bytes = self
                .objects
                .lock()
                .unwrap()
                .get(uri)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(uri.to_string()))?;
            tokio::fs::write(local_path, bytes).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn staging_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib1.jar");
        tokio::fs::write(&file, b"contents").await.unwrap();

        let store = Arc::new(CountingStore::default());
        let stager = Stager::new(store.clone() as Arc<dyn BlobStore>);

        let first = stager
            .stage_classpath_elements(&[file.clone()], "mem://staging")
            .await
            .unwrap();
        let second = stager
            .stage_classpath_elements(&[file], "mem://staging")
            .await
            .unwrap();

        assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(store.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn staged_names_embed_a_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib1.jar");
        tokio::fs::write(&file, b"contents").await.unwrap();

        let store = Arc::new(CountingStore::default());
        let stager = Stager::new(store as Arc<dyn BlobStore>);
        let staged = stager.stage_file(&file, "mem://staging").await.unwrap();

        assert!(staged.name.starts_with("lib1-"));
        assert!(staged.name.ends_with(".jar"));
        assert_eq!(staged.name.len(), "lib1-".len() + HASH_LEN + ".jar".len());
        assert_eq!(staged.location, format!("mem://staging/{}", staged.name));
    }

    #[tokio::test]
    async fn one_failed_upload_fails_the_whole_staging() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.jar");
        let bad = dir.path().join("b.jar");
        tokio::fs::write(&good, b"a").await.unwrap();
        tokio::fs::write(&bad, b"b").await.unwrap();

        let store = Arc::new(CountingStore {
            fail_uploads: true,
            ..CountingStore::default()
        });
        let stager = Stager::new(store as Arc<dyn BlobStore>);

        let result = stager
            .stage_classpath_elements(&[good, bad], "mem://staging")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_manifest_entries_are_fetched_once() {
        let store = Arc::new(CountingStore::default());
        {
            let mut objects = store.objects.lock().unwrap();
            objects.insert(
                "mem://staging/manifest.txt".to_string(),
                b"l c1.bin\nc lib1.jar\nc lib1.jar\n".to_vec(),
            );
            objects.insert("mem://staging/c1.bin".to_string(), b"cont".to_vec());
            objects.insert("mem://staging/lib1.jar".to_string(), b"lib".to_vec());
        }

        let destination = tempfile::tempdir().unwrap();
        let stager = Stager::new(store.clone() as Arc<dyn BlobStore>);
        stager
            .download_manifest("mem://staging/manifest.txt", destination.path())
            .await
            .unwrap();

        // manifest + two distinct entries
        assert_eq!(store.downloads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn downloads_a_staged_run_end_to_end() {
        let source = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        let prefix = LocalBlobStore::uri_of(staging.path());

        let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new());
        let stager = Stager::new(Arc::clone(&store));

        for name in ["c1.bin", "lib1.jar", "lib2.jar"] {
            let file = source.path().join(name);
            tokio::fs::write(&file, name.as_bytes()).await.unwrap();
            store
                .upload(&file, &join_uri(&prefix, name), "application/octet-stream")
                .await
                .unwrap();
        }

        let manifest = RunManifest::new(
            "c1.bin",
            vec!["lib1.jar".to_string(), "lib2.jar".to_string()],
            vec![],
        );
        let manifest_uri = stager
            .upload_manifest(&manifest, &join_uri(&prefix, "manifest.txt"))
            .await
            .unwrap();

        let downloaded = stager
            .download_manifest(&manifest_uri, destination.path())
            .await
            .unwrap();
        assert_eq!(downloaded, manifest);

        let mut fetched: Vec<String> = std::fs::read_dir(destination.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        fetched.sort();
        assert_eq!(fetched, ["c1.bin", "lib1.jar", "lib2.jar"]);
    }
}
