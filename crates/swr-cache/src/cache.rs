//! Stale-while-revalidate cache with single-flight fetches and LRU eviction

use crate::error::{CacheError, FetchError, Result};
use crate::types::{CacheEntry, CacheOptions, CacheStats, Freshness, GetCachedOptions};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type FlightOutcome<V> = Shared<BoxFuture<'static, Result<V>>>;

/// A fetch currently executing for one key
struct Flight<V> {
    id: u64,
    outcome: FlightOutcome<V>,
}

struct State<V> {
    entries: HashMap<String, CacheEntry<V>>,
    flights: HashMap<String, Flight<V>>,
    /// Monotonic access counter used for LRU ordering
    access_clock: u64,
    next_flight_id: u64,
}

impl<V> State<V> {
    fn tick(&mut self) -> u64 {
        self.access_clock += 1;
        self.access_clock
    }

    /// Evict least recently used entries until the cache fits its capacity.
    /// Entries with a fetch in flight and `keep` are never evicted.
    fn evict_overflow(&mut self, capacity: usize, keep: &str) -> u64 {
        let mut evicted = 0;

        while self.entries.len() > capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(key, _)| key.as_str() != keep && !self.flights.contains_key(*key))
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());

            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                    debug!(key = %key, "Evicted least recently used entry");
                    evicted += 1;
                }
                None => {
                    debug!(
                        entries = self.entries.len(),
                        capacity, "No evictable entry, capacity temporarily exceeded"
                    );
                    break;
                }
            }
        }

        evicted
    }
}

struct Inner<V> {
    capacity: usize,
    state: Mutex<State<V>>,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> Inner<V> {
    fn lock(&self) -> MutexGuard<'_, State<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bounded, typed cache shared between concurrent callers.
///
/// Cloning is cheap and every clone refers to the same entries.
pub struct SwrCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SwrCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> SwrCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache holding at most `options.max_size` entries
    pub fn new(options: CacheOptions) -> Result<Self> {
        if options.max_size == 0 {
            return Err(CacheError::Config(
                "max_size must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                capacity: options.max_size,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    flights: HashMap::new(),
                    access_clock: 0,
                    next_flight_id: 0,
                }),
                hits: AtomicU64::new(0),
                stale_hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        })
    }

    /// Get the value for `options.key`, calling `fetch` when it has to be produced.
    ///
    /// - Fresh values are returned without calling `fetch`.
    /// - Stale values are returned immediately and refreshed in the background.
    ///   A failed background refresh is logged and the old value kept.
    /// - Missing or expired values are fetched before returning. Callers
    ///   arriving while a fetch for the same key is running wait for it and
    ///   share its outcome, including errors.
    ///
    /// `fetch` runs on a spawned tokio task, so it keeps running even if the
    /// caller stops waiting.
    pub async fn get_cached<F, Fut, E>(&self, options: GetCachedOptions, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + 'static,
    {
        if options.key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        let outcome = {
            let mut state = self.inner.lock();
            let now = Instant::now();
            let access = state.tick();

            let cached = match state.entries.get_mut(&options.key) {
                Some(entry) => {
                    entry.last_access = access;
                    match entry.freshness(now) {
                        Freshness::Expired => None,
                        freshness => Some((
                            freshness,
                            entry.value.clone(),
                            now.saturating_duration_since(entry.refreshed_at),
                        )),
                    }
                }
                None => None,
            };

            match cached {
                Some((Freshness::Fresh, value, _)) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %options.key, "Cache hit");
                    return Ok(value);
                }
                Some((_, value, age)) => {
                    self.inner.stale_hits.fetch_add(1, Ordering::Relaxed);
                    if !state.flights.contains_key(&options.key) {
                        debug!(
                            key = %options.key,
                            age_ms = age.as_millis() as u64,
                            "Serving stale value, refreshing in background"
                        );
                        self.start_flight(&mut state, &options, fetch, true);
                    }
                    return Ok(value);
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    let joined = state
                        .flights
                        .get(&options.key)
                        .map(|flight| flight.outcome.clone());
                    match joined {
                        Some(outcome) => {
                            debug!(key = %options.key, "Joining in-flight fetch");
                            outcome
                        }
                        None => {
                            debug!(key = %options.key, "Cache miss");
                            self.start_flight(&mut state, &options, fetch, false)
                                .outcome
                                .clone()
                        }
                    }
                }
            }
        };

        match options.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, outcome)
                .await
                .map_err(|_| CacheError::Timeout(limit))?,
            None => outcome.await,
        }
    }

    /// Spawn `fetch` and register it as the in-flight fetch for the key
    fn start_flight<'s, F, Fut, E>(
        &self,
        state: &'s mut State<V>,
        options: &GetCachedOptions,
        fetch: F,
        background: bool,
    ) -> &'s Flight<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + 'static,
    {
        state.next_flight_id += 1;
        let id = state.next_flight_id;

        let guard = FlightGuard {
            cache: Arc::downgrade(&self.inner),
            key: options.key.clone(),
            id,
            ttl: options.ttl,
            stale_time: options.effective_stale_time(),
            background,
            completed: false,
        };

        let handle = tokio::spawn(async move {
            let result = fetch().await.map_err(FetchError::new);
            guard.complete(result)
        });

        let outcome = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(CacheError::Aborted(err.to_string())),
            }
        }
        .boxed()
        .shared();

        state
            .flights
            .insert(options.key.clone(), Flight { id, outcome });
        &state.flights[&options.key]
    }

    /// Remove an entry. A fetch already in flight for the key still stores its result.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Whether an entry exists for `key`, regardless of its freshness
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Number of stored entries, including expired ones
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.inner.capacity,
            in_flight: state.flights.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            stale_hits: self.inner.stale_hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Owned by a fetch task. Stores the result and clears the in-flight marker,
/// or only clears the marker if the task is dropped before completing.
struct FlightGuard<V> {
    cache: Weak<Inner<V>>,
    key: String,
    id: u64,
    ttl: Duration,
    stale_time: Duration,
    background: bool,
    completed: bool,
}

impl<V: Clone> FlightGuard<V> {
    fn complete(mut self, result: std::result::Result<V, FetchError>) -> Result<V> {
        self.completed = true;

        let Some(inner) = self.cache.upgrade() else {
            return result.map_err(CacheError::Fetch);
        };

        let mut state = inner.lock();
        if state
            .flights
            .get(&self.key)
            .is_some_and(|flight| flight.id == self.id)
        {
            state.flights.remove(&self.key);
        }

        match result {
            Ok(value) => {
                let now = Instant::now();
                let existing = state.entries.get(&self.key).map(|entry| entry.last_access);
                let access = match existing {
                    Some(access) => access,
                    None => state.tick(),
                };
                let entry = CacheEntry::new(value.clone(), now, self.ttl, self.stale_time, access);
                state.entries.insert(self.key.clone(), entry);

                let evicted = state.evict_overflow(inner.capacity, &self.key);
                if evicted > 0 {
                    inner.evictions.fetch_add(evicted, Ordering::Relaxed);
                }

                debug!(key = %self.key, background = self.background, "Stored fetched value");
                Ok(value)
            }
            Err(err) => {
                if self.background {
                    warn!(
                        key = %self.key,
                        error = %err,
                        "Background refresh failed, keeping stale value"
                    );
                } else {
                    debug!(key = %self.key, error = %err, "Fetch failed");
                }
                Err(CacheError::Fetch(err))
            }
        }
    }
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        if let Some(inner) = self.cache.upgrade() {
            let mut state = inner.lock();
            if state
                .flights
                .get(&self.key)
                .is_some_and(|flight| flight.id == self.id)
            {
                state.flights.remove(&self.key);
            }
        }
        warn!(key = %self.key, "Fetch task ended without a result");
    }
}
