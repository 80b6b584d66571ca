//! Hoist Submitter
//!
//! The submission entry point of the hoist remote execution system. One
//! [`Submitter::submit`] call carries a serialized continuation through the
//! whole pipeline: stage the continuation and its dependency files, upload
//! the run manifest, hand the run spec to an execution backend, wait for the
//! terminal state and fetch the serialized result back.
//!
//! Dependency uploads are memoized per submitter through an
//! [`UploadCache`], so repeated submissions sharing classpath elements
//! transfer each file at most once.

pub mod error;

pub use error::{Result, SubmitError};

use hoist_core::{LoggingSidecar, RunEnvironment, RunManifest, RunSpec, StagedContinuation};
use hoist_runner::ExecutionBackend;
use hoist_runner::kube::VolumeClaimRepository;
use hoist_store::{BlobStore, StagedPackage, Stager, StoreError, UploadCache, join_uri};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};
use uuid::Uuid;

/// How many cached staging transfers may be in flight at once
const STAGING_CONCURRENCY: usize = 32;

/// How long to wait for volume detachment after a run with read-write
/// mounts on a volume-attaching backend
const DEFAULT_DETACH_GRACE: Duration = Duration::from_secs(10);

/// An opaque serialized continuation, ready to be staged
#[derive(Debug, Clone)]
pub struct ContinuationBlob {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

impl ContinuationBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            file_name: None,
            bytes,
        }
    }

    /// A blob with an explicit file name; the staged name keeps its stem
    pub fn named(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            bytes,
        }
    }

    fn file_name(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| format!("continuation-{}.bin", short_id()))
    }
}

/// Everything one submission needs
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    continuation: ContinuationBlob,
    environment: RunEnvironment,
    classpath_files: Vec<PathBuf>,
    aux_files: Vec<PathBuf>,
}

impl SubmitRequest {
    pub fn new(continuation: ContinuationBlob, environment: RunEnvironment) -> Self {
        Self {
            continuation,
            environment,
            classpath_files: Vec::new(),
            aux_files: Vec::new(),
        }
    }

    /// Local dependency files placed on the workload's load path
    pub fn with_classpath_files(mut self, files: Vec<PathBuf>) -> Self {
        self.classpath_files = files;
        self
    }

    /// Local files shipped to the workload but not loaded
    pub fn with_aux_files(mut self, files: Vec<PathBuf>) -> Self {
        self.aux_files = files;
        self
    }
}

/// Submitter tuning knobs
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Grace period after runs with read-write mounts on a backend that
    /// attaches cluster volumes
    pub detach_grace: Duration,

    /// Logging sidecar attached to every submitted run
    pub logging_sidecar: Option<LoggingSidecar>,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            detach_grace: DEFAULT_DETACH_GRACE,
            logging_sidecar: None,
        }
    }
}

/// Stages continuations and runs them on an execution backend
pub struct Submitter {
    stager: Stager,
    upload_cache: Arc<UploadCache<StagedPackage>>,
    backend: Arc<dyn ExecutionBackend>,
    claims: Option<Arc<VolumeClaimRepository>>,
    staging_location: String,
    config: SubmitterConfig,
}

impl Submitter {
    pub fn new(
        store: Arc<dyn BlobStore>,
        backend: Arc<dyn ExecutionBackend>,
        staging_location: impl Into<String>,
    ) -> Self {
        Self {
            stager: Stager::new(store),
            upload_cache: Arc::new(UploadCache::new()),
            backend,
            claims: None,
            staging_location: staging_location.into(),
            config: SubmitterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SubmitterConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches the claim repository whose lifetime this submitter manages;
    /// [`close`](Self::close) tears its throwaway claims down
    pub fn with_claims(mut self, claims: Arc<VolumeClaimRepository>) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Runs one continuation to completion and returns its serialized result
    ///
    /// Fails with [`SubmitError::NoResult`] when the run finishes without
    /// writing a result location, which covers both failed runs and runs
    /// that only had side effects.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Vec<u8>> {
        let scratch_dir = std::env::temp_dir().join(format!("hoist-submit-{}", short_id()));
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(StoreError::Io)?;

        let outcome = self.submit_from(&request, &scratch_dir).await;
        let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
        outcome
    }

    async fn submit_from(&self, request: &SubmitRequest, scratch_dir: &Path) -> Result<Vec<u8>> {
        let continuation_path = scratch_dir.join(request.continuation.file_name());
        tokio::fs::write(&continuation_path, &request.continuation.bytes)
            .await
            .map_err(StoreError::Io)?;

        let continuation = self
            .stager
            .stage_file(&continuation_path, &self.staging_location)
            .await
            .map_err(SubmitError::Staging)?;
        let classpath = self.stage_cached(&request.classpath_files).await?;
        let aux = self.stage_cached(&request.aux_files).await?;

        let manifest = RunManifest::new(
            continuation.name,
            classpath.iter().map(|p| p.name.clone()).collect(),
            aux.iter().map(|p| p.name.clone()).collect(),
        );
        let manifest_uri = self
            .stager
            .upload_manifest(
                &manifest,
                &join_uri(&self.staging_location, &format!("manifest-{}.txt", short_id())),
            )
            .await
            .map_err(SubmitError::Staging)?;
        info!("Uploaded manifest to {}", manifest_uri);

        let mut spec = RunSpec::from_environment(
            request.environment.clone(),
            StagedContinuation::new(manifest_uri, manifest),
        );
        if let Some(sidecar) = &self.config.logging_sidecar {
            spec = spec.with_logging_sidecar(sidecar.clone());
        }

        let result_location = self.backend.run(&spec).await?;

        let result = match result_location {
            Some(uri) => self.fetch_result(&uri, scratch_dir).await,
            None => Err(SubmitError::NoResult),
        };

        if self.backend.attaches_volumes() && spec.environment().has_read_write_mount() {
            debug!(
                "Waiting {:?} for volumes to detach",
                self.config.detach_grace
            );
            tokio::time::sleep(self.config.detach_grace).await;
        }

        result
    }

    /// Stages local files through the upload cache, bounded fan-out,
    /// results in input order
    async fn stage_cached(&self, files: &[PathBuf]) -> Result<Vec<StagedPackage>> {
        let semaphore = Arc::new(Semaphore::new(STAGING_CONCURRENCY));
        let mut tasks = JoinSet::new();
        for (index, path) in files.iter().cloned().enumerate() {
            let stager = self.stager.clone();
            let cache = Arc::clone(&self.upload_cache);
            let prefix = self.staging_location.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StoreError::TaskFailed(e.to_string()))?;
                let package = cache
                    .get_or_upload(&prefix, &path, || async {
                        stager.stage_file(&path, &prefix).await
                    })
                    .await?;
                Ok::<_, StoreError>((index, package))
            });
        }

        let mut staged: Vec<Option<StagedPackage>> = vec![None; files.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, package) = joined
                .map_err(|e| StoreError::TaskFailed(e.to_string()))
                .map_err(SubmitError::Staging)?
                .map_err(SubmitError::Staging)?;
            staged[index] = Some(package);
        }
        Ok(staged.into_iter().flatten().collect())
    }

    async fn fetch_result(&self, uri: &str, scratch_dir: &Path) -> Result<Vec<u8>> {
        let local = scratch_dir.join(format!("result-{}", short_id()));
        self.stager
            .store()
            .download(uri, &local)
            .await
            .map_err(|source| SubmitError::ResultDownload {
                uri: uri.to_string(),
                source,
            })?;
        let bytes = tokio::fs::read(&local)
            .await
            .map_err(|e| SubmitError::ResultDownload {
                uri: uri.to_string(),
                source: StoreError::Io(e),
            })?;
        info!("Downloaded {} result byte(s) from {}", bytes.len(), uri);
        Ok(bytes)
    }

    /// Releases resources held on behalf of this submitter's runs
    pub async fn close(&self) {
        if let Some(claims) = &self.claims {
            claims.close().await;
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hoist_core::VolumeRequest;
    use hoist_runner::RunnerError;
    use hoist_store::LocalBlobStore;
    use std::sync::Mutex;

    /// Backend that records run specs and plays back a scripted outcome
    struct FakeBackend {
        outcome: Option<String>,
        attaches: bool,
        specs: Mutex<Vec<RunSpec>>,
    }

    impl FakeBackend {
        fn returning(outcome: Option<&str>) -> Self {
            Self {
                outcome: outcome.map(str::to_string),
                attaches: false,
                specs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExecutionBackend for FakeBackend {
        async fn run(&self, spec: &RunSpec) -> std::result::Result<Option<String>, RunnerError> {
            self.specs.lock().unwrap().push(spec.clone());
            Ok(self.outcome.clone())
        }

        fn attaches_volumes(&self) -> bool {
            self.attaches
        }
    }

    struct Fixture {
        staging: tempfile::TempDir,
        source: tempfile::TempDir,
        store: Arc<dyn BlobStore>,
        backend: Arc<FakeBackend>,
    }

    impl Fixture {
        fn new(backend: FakeBackend) -> Self {
            Self {
                staging: tempfile::tempdir().unwrap(),
                source: tempfile::tempdir().unwrap(),
                store: Arc::new(LocalBlobStore::new()),
                backend: Arc::new(backend),
            }
        }

        fn staging_uri(&self) -> String {
            LocalBlobStore::uri_of(self.staging.path())
        }

        fn submitter(&self) -> Submitter {
            Submitter::new(
                Arc::clone(&self.store),
                self.backend.clone(),
                self.staging_uri(),
            )
        }

        async fn classpath_file(&self, name: &str, contents: &[u8]) -> PathBuf {
            let path = self.source.path().join(name);
            tokio::fs::write(&path, contents).await.unwrap();
            path
        }

        /// Plants a result object in the staging dir and returns its URI
        async fn plant_result(&self, contents: &[u8]) -> String {
            let path = self.staging.path().join("result.bin");
            tokio::fs::write(&path, contents).await.unwrap();
            LocalBlobStore::uri_of(&path)
        }

        fn staged_names(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.staging.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        }
    }

    fn request() -> SubmitRequest {
        SubmitRequest::new(
            ContinuationBlob::new(b"serialized continuation".to_vec()),
            RunEnvironment::with_image("busybox:1"),
        )
    }

    #[tokio::test]
    async fn submits_and_fetches_the_result() {
        let fixture = Fixture::new(FakeBackend::returning(None));
        let result_uri = fixture.plant_result(b"42").await;
        let fixture = Fixture {
            backend: Arc::new(FakeBackend::returning(Some(&result_uri))),
            ..fixture
        };
        let lib = fixture.classpath_file("lib1.jar", b"jar bytes").await;

        let submitter = fixture.submitter();
        let result = submitter
            .submit(request().with_classpath_files(vec![lib]))
            .await
            .unwrap();
        assert_eq!(result, b"42");

        // the backend saw a spec pointing at an uploaded manifest
        let specs = fixture.backend.specs.lock().unwrap();
        assert_eq!(specs.len(), 1);
        let manifest = specs[0].staged_continuation().manifest();
        assert!(manifest.continuation().starts_with("continuation-"));
        assert_eq!(manifest.classpath_files().len(), 1);
        assert!(manifest.classpath_files()[0].starts_with("lib1-"));

        // staged objects exist under the prefix: continuation, lib, manifest
        let names = fixture.staged_names();
        assert!(names.iter().any(|n| n.starts_with("continuation-")));
        assert!(names.iter().any(|n| n.starts_with("lib1-")));
        assert!(names.iter().any(|n| n.starts_with("manifest-")));
    }

    #[tokio::test]
    async fn uploaded_manifest_matches_the_spec() {
        let fixture = Fixture::new(FakeBackend::returning(None));
        let lib = fixture.classpath_file("lib1.jar", b"jar").await;
        let notes = fixture.classpath_file("notes.txt", b"aux").await;

        let submitter = fixture.submitter();
        let _ = submitter
            .submit(
                request()
                    .with_classpath_files(vec![lib])
                    .with_aux_files(vec![notes]),
            )
            .await;

        let specs = fixture.backend.specs.lock().unwrap();
        let staged = specs[0].staged_continuation();
        let uploaded = std::fs::read_to_string(
            LocalBlobStore::path_of(staged.manifest_location()).unwrap(),
        )
        .unwrap();
        assert_eq!(uploaded, staged.manifest().serialize());
        assert_eq!(staged.manifest().aux_files().len(), 1);
    }

    #[tokio::test]
    async fn a_failed_continuation_write_is_a_staging_error() {
        let fixture = Fixture::new(FakeBackend::returning(None));
        let submitter = fixture.submitter();

        // points the temp-file write into a directory that does not exist
        let blob = ContinuationBlob::named("missing-dir/cont.bin", b"bytes".to_vec());
        let err = submitter
            .submit(SubmitRequest::new(
                blob,
                RunEnvironment::with_image("busybox:1"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Staging(_)));
        assert!(fixture.backend.specs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_run_without_a_result_is_an_error() {
        let fixture = Fixture::new(FakeBackend::returning(None));
        let submitter = fixture.submitter();

        let err = submitter.submit(request()).await.unwrap_err();
        assert!(matches!(err, SubmitError::NoResult));
    }

    #[tokio::test]
    async fn repeated_submissions_stage_shared_files_once() {
        let fixture = Fixture::new(FakeBackend::returning(None));
        let lib = fixture.classpath_file("lib1.jar", b"jar bytes").await;

        let submitter = fixture.submitter();
        for _ in 0..2 {
            let _ = submitter
                .submit(request().with_classpath_files(vec![lib.clone()]))
                .await;
        }

        let lib_copies = fixture
            .staged_names()
            .iter()
            .filter(|n| n.starts_with("lib1-"))
            .count();
        assert_eq!(lib_copies, 1);
    }

    #[tokio::test]
    async fn named_continuations_keep_their_stem() {
        let fixture = Fixture::new(FakeBackend::returning(None));
        let submitter = fixture.submitter();

        let _ = submitter
            .submit(SubmitRequest::new(
                ContinuationBlob::named("entrypoint.bin", b"bytes".to_vec()),
                RunEnvironment::with_image("busybox:1"),
            ))
            .await;

        let specs = fixture.backend.specs.lock().unwrap();
        assert!(
            specs[0]
                .staged_continuation()
                .manifest()
                .continuation()
                .starts_with("entrypoint-")
        );
    }

    #[tokio::test]
    async fn configured_sidecar_rides_along() {
        let fixture = Fixture::new(FakeBackend::returning(None));
        let submitter = fixture.submitter().with_config(SubmitterConfig {
            logging_sidecar: Some(LoggingSidecar::new("fluentd:1", vec![])),
            ..SubmitterConfig::default()
        });

        let _ = submitter.submit(request()).await;

        let specs = fixture.backend.specs.lock().unwrap();
        assert_eq!(
            specs[0].logging_sidecar().map(|s| s.image.as_str()),
            Some("fluentd:1")
        );
    }

    #[tokio::test]
    async fn volume_attaching_runs_still_return_the_result() {
        let result_bytes = b"ok";
        let fixture = Fixture::new(FakeBackend::returning(None));
        let result_uri = fixture.plant_result(result_bytes).await;
        let backend = FakeBackend {
            outcome: Some(result_uri),
            attaches: true,
            specs: Mutex::new(Vec::new()),
        };
        let fixture = Fixture {
            backend: Arc::new(backend),
            ..fixture
        };
        let submitter = fixture.submitter().with_config(SubmitterConfig {
            detach_grace: Duration::from_millis(1),
            ..SubmitterConfig::default()
        });

        // read-write mount on an attaching backend takes the grace-period path
        let request = SubmitRequest::new(
            ContinuationBlob::new(b"bytes".to_vec()),
            RunEnvironment::with_image("busybox:1")
                .with_mount(VolumeRequest::ephemeral("fast", "1Gi").mount_read_write("/scratch")),
        );
        let result = submitter.submit(request).await.unwrap();
        assert_eq!(result, result_bytes);
    }
}
