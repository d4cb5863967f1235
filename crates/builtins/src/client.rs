use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use studio_types::{StudioError, StudioResult};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BuiltinsConfig;
use crate::store::{BinaryStore, GcsStore};

/// Installs and invokes the builtins binary for one platform.
///
/// All installs and downloads go through a single async gate. A caller that
/// arrives while a download is in flight waits for it and then observes the
/// finished binary, so nobody is handed a path to a half-written file and the
/// binary is downloaded at most once per install.
pub struct BuiltinsClient {
    config: BuiltinsConfig,
    store: Arc<dyn BinaryStore>,
    /// Serializes installs and downloads.
    gate: Mutex<()>,
}

impl std::fmt::Debug for BuiltinsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinsClient").field("config", &self.config).finish_non_exhaustive()
    }
}

impl BuiltinsClient {
    /// Client for `config` reading from `store`. Unsupported platforms are
    /// rejected here, before any network access.
    pub fn new(config: BuiltinsConfig, store: Arc<dyn BinaryStore>) -> StudioResult<Self> {
        config.ensure_supported()?;
        Ok(Self {
            config,
            store,
            gate: Mutex::new(()),
        })
    }

    /// Client backed by the public storage bucket named in `config`.
    pub fn with_default_store(config: BuiltinsConfig) -> StudioResult<Self> {
        config.ensure_supported()?;
        let store = GcsStore::new(&config.storage_base_url, &config.bucket)?;
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &BuiltinsConfig {
        &self.config
    }

    pub fn binary_path(&self) -> PathBuf {
        self.config.binary_path()
    }

    /// Make sure the latest binary is cached and return its path.
    ///
    /// Missing binaries are downloaded. Cached ones are checked against the
    /// published checksum on every call, reused when it matches and replaced
    /// otherwise.
    pub async fn install(&self) -> StudioResult<PathBuf> {
        let _gate = self.gate.lock().await;
        let binary_path = self.config.binary_path();
        if !fs::try_exists(&binary_path).await.unwrap_or(false) {
            debug!(path = %binary_path.display(), "builtins binary not found");
        } else if self.is_latest_version().await? {
            debug!(path = %binary_path.display(), "using cached builtins binary");
            return Ok(binary_path);
        } else {
            debug!(path = %binary_path.display(), "builtins binary out of date");
        }
        self.download_locked().await
    }

    /// Unconditionally download the binary, replacing any cached copy.
    pub async fn download(&self) -> StudioResult<PathBuf> {
        let _gate = self.gate.lock().await;
        self.download_locked().await
    }

    /// Re-download after a builtin process was killed, which usually means
    /// the cached binary is corrupt.
    pub async fn refresh(&self) -> StudioResult<PathBuf> {
        warn!(path = %self.config.binary_path().display(), "refreshing builtins binary");
        self.download().await
    }

    /// `[binary_path, request_json]`.
    pub fn cmd(&self, request_json: &str) -> Vec<String> {
        vec![self.config.binary_path().display().to_string(), request_json.to_string()]
    }

    async fn is_latest_version(&self) -> StudioResult<bool> {
        let remote = self.store.checksum(&self.config.object_name()).await?;
        let checksum_path = self.config.checksum_path();
        match fs::read_to_string(&checksum_path).await {
            Ok(local) => Ok(local.trim() == remote.trim()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %checksum_path.display(), "builtins checksum file does not exist");
                Ok(false)
            }
            Err(error) => {
                warn!(path = %checksum_path.display(), error = %error, "failed to read builtins checksum file");
                Ok(false)
            }
        }
    }

    /// Caller must hold the gate.
    async fn download_locked(&self) -> StudioResult<PathBuf> {
        let object = self.config.object_name();
        info!(object = %object, "downloading builtins binary");
        let stored = self.store.fetch(&object).await?;

        let cache_dir = &self.config.cache_dir;
        fs::create_dir_all(cache_dir)
            .await
            .map_err(|error| io_error(format!("creating {}", cache_dir.display()), error))?;

        // Write next to the final path and rename so the binary path never
        // holds a partial file.
        let binary_path = self.config.binary_path();
        let partial_path = binary_path.with_extension("partial");
        fs::write(&partial_path, &stored.bytes)
            .await
            .map_err(|error| io_error("creating binary file", error))?;
        make_executable(&partial_path).await?;
        fs::rename(&partial_path, &binary_path)
            .await
            .map_err(|error| io_error("moving binary into place", error))?;

        fs::write(self.config.checksum_path(), stored.checksum.as_bytes())
            .await
            .map_err(|error| io_error("creating checksum file", error))?;
        info!(path = %binary_path.display(), bytes = stored.bytes.len(), "builtins binary downloaded");
        Ok(binary_path)
    }
}

fn io_error(context: impl Into<String>, error: std::io::Error) -> StudioError {
    StudioError::internal(context, error)
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> StudioResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|error| io_error("granting file permissions", error))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> StudioResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredObject;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeStore {
        contents: std::sync::Mutex<StoredObject>,
        fetches: AtomicUsize,
        checksum_calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeStore {
        fn new(bytes: &[u8], checksum: &str) -> Arc<Self> {
            Arc::new(Self {
                contents: std::sync::Mutex::new(StoredObject {
                    bytes: bytes.to_vec(),
                    checksum: checksum.to_string(),
                }),
                fetches: AtomicUsize::new(0),
                checksum_calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
            })
        }

        fn publish(&self, bytes: &[u8], checksum: &str) {
            *self.contents.lock().unwrap() = StoredObject {
                bytes: bytes.to_vec(),
                checksum: checksum.to_string(),
            };
        }
    }

    #[async_trait]
    impl BinaryStore for FakeStore {
        async fn checksum(&self, _object: &str) -> StudioResult<String> {
            self.checksum_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.contents.lock().unwrap().checksum.clone())
        }

        async fn fetch(&self, _object: &str) -> StudioResult<StoredObject> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.contents.lock().unwrap().clone())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl BinaryStore for FailingStore {
        async fn checksum(&self, _object: &str) -> StudioResult<String> {
            Err(StudioError::upstream("getting builtins latest version", "connection refused"))
        }

        async fn fetch(&self, _object: &str) -> StudioResult<StoredObject> {
            Err(StudioError::upstream("downloading builtins binary", "connection refused"))
        }
    }

    fn config(directory: &Path) -> BuiltinsConfig {
        BuiltinsConfig::for_root(directory)
            .with_platform("linux", "amd64")
            .with_cache_dir(directory.join(".airplane"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cold_installs_download_once() {
        let directory = tempfile::tempdir().unwrap();
        let store = FakeStore::new(b"#!/bin/sh\necho builtins\n", "abc123==");
        let client = Arc::new(BuiltinsClient::new(config(directory.path()), store.clone()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move { client.install().await }));
        }
        for handle in handles {
            let path = handle.await.unwrap().unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), b"#!/bin/sh\necho builtins\n");
        }

        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        let checksum = std::fs::read_to_string(client.config().checksum_path()).unwrap();
        assert_eq!(checksum, "abc123==");
    }

    #[tokio::test]
    async fn matching_checksum_reuses_cached_binary() {
        let directory = tempfile::tempdir().unwrap();
        let store = FakeStore::new(b"v1", "sum-1");
        BuiltinsClient::new(config(directory.path()), store.clone())
            .unwrap()
            .install()
            .await
            .unwrap();

        let fresh = BuiltinsClient::new(config(directory.path()), store.clone()).unwrap();
        fresh.install().await.unwrap();

        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.checksum_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_downloads_again() {
        let directory = tempfile::tempdir().unwrap();
        let store = FakeStore::new(b"v1", "sum-1");
        let path = BuiltinsClient::new(config(directory.path()), store.clone())
            .unwrap()
            .install()
            .await
            .unwrap();

        store.publish(b"v2", "sum-2");
        let fresh = BuiltinsClient::new(config(directory.path()), store.clone()).unwrap();
        fresh.install().await.unwrap();

        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
        assert_eq!(std::fs::read_to_string(fresh.config().checksum_path()).unwrap(), "sum-2");
    }

    #[tokio::test]
    async fn long_lived_clients_pick_up_new_releases() {
        let directory = tempfile::tempdir().unwrap();
        let store = FakeStore::new(b"v1", "sum-1");
        let client = BuiltinsClient::new(config(directory.path()), store.clone()).unwrap();
        let path = client.install().await.unwrap();
        client.install().await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

        store.publish(b"v2", "sum-2");
        client.install().await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
        assert_eq!(store.checksum_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_forces_a_download() {
        let directory = tempfile::tempdir().unwrap();
        let store = FakeStore::new(b"v1", "sum-1");
        let client = BuiltinsClient::new(config(directory.path()), store.clone()).unwrap();
        client.install().await.unwrap();
        client.install().await.unwrap();
        client.refresh().await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn downloaded_binary_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let directory = tempfile::tempdir().unwrap();
        let client = BuiltinsClient::new(config(directory.path()), FakeStore::new(b"bin", "sum")).unwrap();
        let path = client.install().await.unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[tokio::test]
    async fn storage_failures_surface_and_can_be_retried() {
        let directory = tempfile::tempdir().unwrap();
        let client = BuiltinsClient::new(config(directory.path()), Arc::new(FailingStore)).unwrap();
        let error = client.install().await.unwrap_err();
        assert_eq!(error.class(), studio_types::ErrorClass::Upstream);
        assert!(!client.binary_path().exists());
        assert!(client.install().await.is_err());
    }

    #[test]
    fn unsupported_platforms_fail_without_network() {
        let directory = tempfile::tempdir().unwrap();
        let config = config(directory.path()).with_platform("windows", "arm64");
        let error = BuiltinsClient::new(config, Arc::new(FailingStore)).unwrap_err();
        assert_eq!(error.class(), studio_types::ErrorClass::Unsupported);
    }

    #[test]
    fn cmd_passes_request_as_single_argument() {
        let directory = tempfile::tempdir().unwrap();
        let client = BuiltinsClient::new(config(directory.path()), FakeStore::new(b"", "")).unwrap();
        let argv = client.cmd(r#"{"namespace":"sql","name":"query","request":{}}"#);
        assert_eq!(argv.len(), 2);
        assert!(argv[0].ends_with("builtins-linux-amd64"));
        assert_eq!(argv[1], r#"{"namespace":"sql","name":"query","request":{}}"#);
    }
}
