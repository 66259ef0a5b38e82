use std::fs::{read, remove_dir, remove_file};
use std::io;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Result, anyhow};
use walkdir::WalkDir;

use crate::config::Config;

use super::FilesystemCacheStore;
use super::fs::parse_entry;

/// Entry function for the cleanup command.
///
/// This removes all expired and unreadable entries from the filesystem cache.
/// If `dry_run` is `true`, no files will actually be deleted.
pub fn cleanup(config: Config, dry_run: bool) -> Result<()> {
    let store = FilesystemCacheStore::from_config(&config)?.ok_or_else(|| {
        anyhow!("no caching configured! Did you provide a path to your config file?")
    })?;
    store.cleanup(dry_run)?;
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub removed_dirs: usize,
    pub removed_files: usize,
    pub removed_bytes: u64,

    pub retained_files: usize,
    pub retained_bytes: u64,
}

impl FilesystemCacheStore {
    /// Removes expired and malformed entries, and directories that end up empty.
    ///
    /// If `dry_run` is `true`, no files will actually be deleted.
    pub fn cleanup(&self, dry_run: bool) -> Result<CleanupStats> {
        tracing::info!("Cleaning up cache at {}", self.cache_dir().display());

        let now = SystemTime::now();
        let mut stats = CleanupStats::default();

        // Visiting the contents first lets us remove directories once they are empty.
        for dir_entry in WalkDir::new(self.cache_dir()).min_depth(1).contents_first(true) {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();

            if dir_entry.file_type().is_dir() {
                if is_empty_dir(path)? {
                    tracing::debug!("Removing directory `{}`", path.display());
                    if !dry_run {
                        catch_not_found(|| remove_dir(path))?;
                    }
                    stats.removed_dirs += 1;
                }
                continue;
            }

            let size = dir_entry.metadata()?.len();
            let Some(bytes) = catch_not_found(|| read(path))? else {
                continue;
            };

            let keep = parse_entry(path, &bytes).is_some_and(|entry| !entry.is_expired(now));
            if keep {
                stats.retained_files += 1;
                stats.retained_bytes += size;
            } else {
                tracing::debug!("Removing file `{}`", path.display());
                if !dry_run {
                    catch_not_found(|| remove_file(path))?;
                }
                stats.removed_files += 1;
                stats.removed_bytes += size;
            }
        }

        metric!(gauge("caches.size.files") = stats.retained_files as u64);
        metric!(gauge("caches.size.bytes") = stats.retained_bytes);
        metric!(counter("caches.size.files_removed") += stats.removed_files as i64);
        metric!(counter("caches.size.bytes_removed") += stats.removed_bytes as i64);

        tracing::info!(
            removed_files = stats.removed_files,
            removed_bytes = stats.removed_bytes,
            removed_dirs = stats.removed_dirs,
            retained_files = stats.retained_files,
            retained_bytes = stats.retained_bytes,
            dry_run,
            "Cleaned up cache",
        );

        Ok(stats)
    }
}

fn is_empty_dir(path: &Path) -> io::Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Runs `f`, turning a `NotFound` error into `Ok(None)`.
///
/// Files can vanish while we walk the cache, as the server keeps writing to it.
fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::caching::CacheStore;
    use crate::types::{FetchKey, VideoMetadata};

    fn key(n: usize) -> FetchKey {
        let url = format!("https://example.com/@someone/video/{n}");
        FetchKey::new(url.parse().unwrap(), false)
    }

    fn metadata() -> Arc<VideoMetadata> {
        Arc::new(VideoMetadata {
            video_url: "https://cdn.example.com/v.mp4".into(),
            title: "title".into(),
            author: "someone".into(),
        })
    }

    #[tokio::test]
    async fn test_cleanup() {
        clipfetch_test::setup();
        let basedir = clipfetch_test::tempdir();
        let store = FilesystemCacheStore::new(basedir.path()).unwrap();

        store
            .set(&key(1), metadata(), Duration::from_secs(3600))
            .await
            .unwrap();
        store
            .set(&key(2), metadata(), Duration::ZERO)
            .await
            .unwrap();

        let malformed = store.entry_path(&key(3));
        std::fs::create_dir_all(malformed.parent().unwrap()).unwrap();
        std::fs::write(&malformed, b"malformed").unwrap();

        let dry_stats = store.cleanup(true).unwrap();
        assert_eq!(dry_stats.removed_files, 2);
        assert_eq!(dry_stats.retained_files, 1);
        assert!(malformed.exists());

        let stats = store.cleanup(false).unwrap();
        assert_eq!(stats.removed_files, 2);
        assert_eq!(stats.retained_files, 1);
        assert!(!malformed.exists());
        assert!(!store.entry_path(&key(2)).exists());

        assert!(store.get(&key(1)).await.unwrap().is_some());
    }

    #[test]
    fn test_cleanup_without_cache_dir() {
        let config = Config {
            cache_dir: None,
            ..Default::default()
        };
        assert!(cleanup(config, true).is_err());
    }
}
