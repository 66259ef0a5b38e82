use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::types::{FetchKey, VideoMetadata};

use super::{CacheStore, CacheStoreError, MAX_TTL};

/// The on-disk representation of one cache entry.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct StoredEntry {
    /// Milliseconds since the unix epoch after which this entry is stale.
    pub expires_at: u64,
    pub metadata: VideoMetadata,
}

impl StoredEntry {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        unix_millis(now) >= self.expires_at
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// A [`CacheStore`] persisting entries as JSON files.
///
/// Every key is stored in its own file below `<cache_dir>/videos`, named after the
/// [`cache_key`](FetchKey::cache_key). New entries are first written to `<cache_dir>/tmp` and
/// then atomically moved into place, so readers never observe partially written files.
#[derive(Debug, Clone)]
pub struct FilesystemCacheStore {
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl FilesystemCacheStore {
    /// Creates the store below `base`, creating the directories if needed.
    pub fn new(base: &Path) -> io::Result<Self> {
        let cache_dir = base.join("videos");
        let tmp_dir = base.join("tmp");
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::create_dir_all(&tmp_dir)?;

        Ok(Self { cache_dir, tmp_dir })
    }

    /// Creates the store if a `cache_dir` is configured.
    pub fn from_config(config: &Config) -> io::Result<Option<Self>> {
        config.cache_dir.as_deref().map(Self::new).transpose()
    }

    /// The directory holding the cache entries.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Clear the temporary files.
    ///
    /// This needs to happen on startup, to get rid of temp files that survived a hard crash.
    pub fn clear_tmp(&self) -> io::Result<()> {
        if self.tmp_dir.exists() {
            std::fs::remove_dir_all(&self.tmp_dir)?;
        }
        std::fs::create_dir_all(&self.tmp_dir)
    }

    pub(super) fn entry_path(&self, key: &FetchKey) -> PathBuf {
        let cache_key = key.cache_key();
        let (prefix, rest) = cache_key.split_at(2);
        self.cache_dir.join(prefix).join(rest)
    }

    fn write_entry(&self, path: &Path, entry: &StoredEntry) -> io::Result<()> {
        let mut temp_file = NamedTempFile::new_in(&self.tmp_dir)?;
        serde_json::to_writer(temp_file.as_file_mut(), entry)?;
        temp_file.as_file().sync_data()?;
        persist_tempfile(temp_file, path)
    }
}

/// Parses a stored entry, treating unreadable contents as absent.
pub(super) fn parse_entry(path: &Path, bytes: &[u8]) -> Option<StoredEntry> {
    match serde_json::from_slice(bytes) {
        Ok(entry) => Some(entry),
        Err(err) => {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                path = %path.display(),
                "Ignoring malformed cache file",
            );
            None
        }
    }
}

impl CacheStore for FilesystemCacheStore {
    fn get<'a>(
        &'a self,
        key: &'a FetchKey,
    ) -> BoxFuture<'a, Result<Option<Arc<VideoMetadata>>, CacheStoreError>> {
        Box::pin(async move {
            let path = self.entry_path(key);
            tracing::trace!("Trying cache at path {}", path.display());

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(CacheStoreError::Read(err.to_string())),
            };

            let entry = parse_entry(&path, &bytes)
                .filter(|entry| !entry.is_expired(SystemTime::now()))
                .map(|entry| Arc::new(entry.metadata));
            Ok(entry)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a FetchKey,
        value: Arc<VideoMetadata>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheStoreError>> {
        Box::pin(async move {
            let path = self.entry_path(key);
            let entry = StoredEntry {
                expires_at: unix_millis(SystemTime::now() + ttl.min(MAX_TTL)),
                metadata: VideoMetadata::clone(&value),
            };

            tracing::trace!("Creating cache entry at path {}", path.display());
            let store = self.clone();
            tokio::task::spawn_blocking(move || store.write_entry(&path, &entry))
                .await
                .map_err(|err| CacheStoreError::Write(err.to_string()))?
                .map_err(|err| CacheStoreError::Write(err.to_string()))
        })
    }
}

/// Moves `temp_file` to `cache_path`, creating parent directories as needed.
fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<()> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;

    // `cleanup` could potentially remove the parent directory we are operating in,
    // so retry the fs operations.
    const MAX_RETRIES: usize = 2;
    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %parent.display(),
                "Failed to create cache directory",
            );
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    path = %cache_path.display(),
                    "Failed to create cache file",
                );
                if retries > MAX_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> Arc<VideoMetadata> {
        Arc::new(VideoMetadata {
            video_url: "https://cdn.example.com/v.mp4".into(),
            title: "title".into(),
            author: "someone".into(),
        })
    }

    fn key(remove_watermark: bool) -> FetchKey {
        FetchKey::new(
            "https://example.com/@someone/video/1".parse().unwrap(),
            remove_watermark,
        )
    }

    #[test]
    fn test_dirs_created() {
        let basedir = clipfetch_test::tempdir();
        let config = Config {
            cache_dir: Some(basedir.path().join("cache")),
            ..Default::default()
        };

        let store = FilesystemCacheStore::from_config(&config).unwrap().unwrap();
        assert!(store.cache_dir().is_dir());
        assert!(basedir.path().join("cache/tmp").is_dir());
    }

    #[test]
    fn test_disabled_without_cache_dir() {
        let config = Config {
            cache_dir: None,
            ..Default::default()
        };
        assert!(FilesystemCacheStore::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_tmp_cleared() {
        let basedir = clipfetch_test::tempdir();
        let store = FilesystemCacheStore::new(basedir.path()).unwrap();

        let spam = basedir.path().join("tmp/spam");
        std::fs::write(&spam, b"spam").unwrap();

        store.clear_tmp().unwrap();
        assert!(!spam.exists());
        assert!(basedir.path().join("tmp").is_dir());
    }

    #[tokio::test]
    async fn test_roundtrip_and_survives_reopen() {
        clipfetch_test::setup();
        let basedir = clipfetch_test::tempdir();
        let store = FilesystemCacheStore::new(basedir.path()).unwrap();

        assert_eq!(store.get(&key(false)).await, Ok(None));
        store
            .set(&key(false), metadata(), Duration::from_secs(60))
            .await
            .unwrap();

        let path = store.entry_path(&key(false));
        assert!(path.is_file());

        let reopened = FilesystemCacheStore::new(basedir.path()).unwrap();
        assert_eq!(reopened.get(&key(false)).await, Ok(Some(metadata())));
        assert_eq!(reopened.get(&key(true)).await, Ok(None));
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        clipfetch_test::setup();
        let basedir = clipfetch_test::tempdir();
        let store = FilesystemCacheStore::new(basedir.path()).unwrap();

        store
            .set(&key(false), metadata(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.get(&key(false)).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get(&key(false)).await, Ok(None));
    }

    #[tokio::test]
    async fn test_huge_ttl_is_capped() {
        clipfetch_test::setup();
        let basedir = clipfetch_test::tempdir();
        let store = FilesystemCacheStore::new(basedir.path()).unwrap();

        store
            .set(&key(false), metadata(), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(store.get(&key(false)).await, Ok(Some(metadata())));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_miss() {
        clipfetch_test::setup();
        let basedir = clipfetch_test::tempdir();
        let store = FilesystemCacheStore::new(basedir.path()).unwrap();

        let path = store.entry_path(&key(false));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"malformed").unwrap();

        assert_eq!(store.get(&key(false)).await, Ok(None));
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_read_error() {
        clipfetch_test::setup();
        let basedir = clipfetch_test::tempdir();
        let store = FilesystemCacheStore::new(basedir.path()).unwrap();

        // a directory where the file should be can not be read
        std::fs::create_dir_all(store.entry_path(&key(false))).unwrap();

        assert!(matches!(
            store.get(&key(false)).await,
            Err(CacheStoreError::Read(_))
        ));
    }
}
