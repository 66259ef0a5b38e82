//! Single-flight resolution of [`FetchKey`]s.
//!
//! The [`FetchCoordinator`] sits in front of the slow [`Producer`] and the [`CacheStore`]:
//!
//! - A fresh entry in the store is returned right away.
//! - On a miss, the first caller for a key starts a *flight*, a spawned task that runs the
//!   producer and writes a successful result to the store. Every caller that misses while the
//!   flight is running joins it and receives the very same outcome.
//! - Failures are broadcast to everyone waiting on the flight, but never stored, so the next
//!   caller tries again.
//!
//! Flights run detached from the callers that started or joined them. Dropping a `resolve`
//! future only stops waiting; the producer keeps running and its result is still stored.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use sentry::{Hub, SentryFutureExt};

use crate::caching::CacheStore;
use crate::producer::{FetchError, FetchResult, Producer};
use crate::types::{FetchKey, Resolution, VideoMetadata};
use crate::utils::futures::{CallOnDrop, m, measure};

/// The receiving end of a flight, shared by the leader and all joined waiters.
type FlightChannel = Shared<oneshot::Receiver<FetchResult<Resolution>>>;

type FlightMap = Mutex<HashMap<FetchKey, FlightChannel>>;

/// Resolves [`FetchKey`]s through a [`CacheStore`], running the [`Producer`] at most once per key
/// at a time.
///
/// This is cheap to clone, all clones share the same store and flights.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    store: Arc<dyn CacheStore>,
    producer: Arc<dyn Producer>,
    ttl: Duration,
    producer_timeout: Option<Duration>,
    flights: FlightMap,
}

impl FetchCoordinator {
    /// Creates a new coordinator.
    ///
    /// Successful results are stored with the given `ttl`. A single producer run is aborted with
    /// [`FetchError::Timeout`] after `producer_timeout`, if given.
    pub fn new(
        store: Arc<dyn CacheStore>,
        producer: Arc<dyn Producer>,
        ttl: Duration,
        producer_timeout: Option<Duration>,
    ) -> Self {
        let inner = CoordinatorInner {
            store,
            producer,
            ttl,
            producer_timeout,
            flights: Mutex::new(HashMap::new()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the result for `key`, from the cache or by running the producer.
    ///
    /// Concurrent calls for the same key that miss the cache share one producer run and all
    /// receive its outcome.
    pub async fn resolve(&self, key: FetchKey) -> FetchResult<Resolution> {
        metric!(counter("coordinator.resolve") += 1);

        if let Some(metadata) = self.inner.lookup(&key).await {
            metric!(counter("coordinator.cache.hit") += 1);
            tracing::debug!(%key, "Serving from cache");
            return Ok(Resolution::cached(metadata));
        }
        metric!(counter("coordinator.cache.miss") += 1);

        let channel = self.join_or_start(key);
        match channel.await {
            Ok(outcome) => outcome,
            // the flight died without reporting an outcome
            Err(oneshot::Canceled) => Err(FetchError::InternalError),
        }
    }

    /// The number of keys that currently have a flight running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.lock().unwrap().len()
    }

    /// Joins the running flight for `key`, or starts a new one.
    fn join_or_start(&self, key: FetchKey) -> FlightChannel {
        let mut flights = self.inner.flights.lock().unwrap();
        if let Some(channel) = flights.get(&key) {
            metric!(counter("coordinator.flight.joined") += 1);
            tracing::trace!(%key, "Joining running flight");
            return channel.clone();
        }

        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();
        flights.insert(key.clone(), channel.clone());
        metric!(gauge("coordinator.flights.in_flight") = flights.len() as u64);
        drop(flights);

        metric!(counter("coordinator.flight.started") += 1);
        tracing::trace!(%key, "Starting flight");

        // Removes the flight once it is decided, and also if the task dies before that.
        let token = {
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            CallOnDrop::new(move || {
                if let Ok(mut flights) = inner.flights.lock() {
                    flights.remove(&key);
                    metric!(gauge("coordinator.flights.in_flight") = flights.len() as u64);
                }
            })
        };

        let inner = Arc::clone(&self.inner);
        let flight = async move {
            let outcome = inner.fly(&key).await;
            // Waiters that still hold the channel get the outcome; everyone arriving after
            // this point finds the store populated instead.
            drop(token);
            sender.send(outcome).ok();
        };
        tokio::spawn(flight.bind_hub(Hub::new_from_top(Hub::current())));

        channel
    }
}

impl CoordinatorInner {
    /// Looks up `key` in the store, treating read errors as a miss.
    async fn lookup(&self, key: &FetchKey) -> Option<Arc<VideoMetadata>> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(error) => {
                metric!(counter("coordinator.cache.read_error") += 1);
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    %key,
                    "Failed to read from cache"
                );
                None
            }
        }
    }

    /// The body of a flight: produce the value for `key` and store it.
    async fn fly(&self, key: &FetchKey) -> FetchResult<Resolution> {
        // The store might have been populated by a flight that finished between our miss and
        // this flight starting.
        if let Some(metadata) = self.lookup(key).await {
            tracing::debug!(%key, "Serving from cache after flight start");
            return Ok(Resolution::cached(metadata));
        }

        let timer = "coordinator.producer.duration";
        let result = match self.producer_timeout {
            Some(timeout) => {
                let produce = tokio::time::timeout(timeout, self.producer.produce(key));
                measure(timer, m::timed_result, produce)
                    .await
                    .unwrap_or(Err(FetchError::Timeout(timeout)))
            }
            None => measure(timer, m::result, self.producer.produce(key)).await,
        };

        let metadata = match result {
            Ok(metadata) => Arc::new(metadata),
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    error_kind = error.as_tag(),
                    %key,
                    "Failed to fetch video"
                );
                return Err(error);
            }
        };

        if let Err(error) = self.store.set(key, Arc::clone(&metadata), self.ttl).await {
            metric!(counter("coordinator.cache.write_error") += 1);
            tracing::error!(
                error = &error as &dyn std::error::Error,
                %key,
                "Failed to write to cache"
            );
        }

        Ok(Resolution::produced(metadata))
    }
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("ttl", &self.inner.ttl)
            .field("producer_timeout", &self.inner.producer_timeout)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
