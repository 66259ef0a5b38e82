//! Scriptable doubles for the [`Producer`] and [`CacheStore`] seams.
//!
//! Both count how often they are invoked, which is what most coordinator tests assert on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::caching::{CacheStore, CacheStoreError, InMemoryCacheStore};
use crate::producer::{FetchError, FetchResult, Producer};
use crate::types::{FetchKey, VideoMetadata};

/// Creates a [`FetchKey`] for a video page on `example.com`.
pub fn key(video: &str, remove_watermark: bool) -> FetchKey {
    let url = format!("https://example.com/@someone/video/{video}");
    FetchKey::new(url.parse().unwrap(), remove_watermark)
}

#[derive(Debug)]
enum Outcome {
    Success,
    Failure(FetchError),
    Panic,
}

/// A [`Producer`] that sleeps for a fixed delay before returning a scripted outcome.
///
/// Successful results carry the number of the invocation in their title, so tests can tell
/// whether a value was recomputed.
#[derive(Debug)]
pub struct TestProducer {
    delay: Duration,
    outcome: Outcome,
    calls: AtomicUsize,
}

impl TestProducer {
    fn new(delay: Duration, outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            delay,
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(delay: Duration) -> Arc<Self> {
        Self::new(delay, Outcome::Success)
    }

    pub fn failing(delay: Duration, error: FetchError) -> Arc<Self> {
        Self::new(delay, Outcome::Failure(error))
    }

    pub fn panicking(delay: Duration) -> Arc<Self> {
        Self::new(delay, Outcome::Panic)
    }

    /// The number of times [`produce`](Producer::produce) was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Producer for TestProducer {
    fn produce<'a>(&'a self, key: &'a FetchKey) -> BoxFuture<'a, FetchResult<VideoMetadata>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;

            match &self.outcome {
                Outcome::Success => Ok(VideoMetadata {
                    video_url: format!("https://cdn.example.com/{}.mp4", key.cache_key()),
                    title: format!("video #{call}"),
                    author: "someone".into(),
                }),
                Outcome::Failure(error) => Err(error.clone()),
                Outcome::Panic => panic!("producer exploded"),
            }
        })
    }
}

/// A [`CacheStore`] backed by an [`InMemoryCacheStore`] that can be told to fail or to be slow.
#[derive(Debug)]
pub struct TestStore {
    inner: InMemoryCacheStore,
    read_delay_ms: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCacheStore::new(100),
            read_delay_ms: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }

    /// Makes reads take `delay` to return.
    ///
    /// The entry is looked up before the delay, so a read returns what was stored when it
    /// started.
    pub fn delay_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The number of attempted writes, including failed ones.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Reads from the underlying store, regardless of `fail_reads`.
    pub async fn peek(&self, key: &FetchKey) -> Option<Arc<VideoMetadata>> {
        self.inner.get(key).await.ok().flatten()
    }
}

impl CacheStore for TestStore {
    fn get<'a>(
        &'a self,
        key: &'a FetchKey,
    ) -> BoxFuture<'a, Result<Option<Arc<VideoMetadata>>, CacheStoreError>> {
        Box::pin(async move {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(CacheStoreError::Read("connection refused".into()));
            }
            let entry = self.inner.get(key).await;

            let delay = self.read_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            entry
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a FetchKey,
        value: Arc<VideoMetadata>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheStoreError>> {
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CacheStoreError::Write("disk full".into()));
            }
            self.inner.set(key, value, ttl).await
        })
    }
}
