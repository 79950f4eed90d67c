//! Cache types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Construction options for a cache instance
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Maximum number of entries. Must be greater than zero.
    pub max_size: usize,
}

/// Per-call freshness parameters for [`SwrCache::get_cached`](crate::SwrCache::get_cached)
#[derive(Debug, Clone)]
pub struct GetCachedOptions {
    pub key: String,
    /// Total lifetime of a fetched value
    pub ttl: Duration,
    /// Age after which the value is still served but refreshed in the background.
    /// Values greater than `ttl` are clamped to `ttl`.
    pub stale_time: Duration,
    /// How long a caller waits on an in-flight fetch before giving up.
    /// `None` waits for as long as the fetch takes.
    pub wait_timeout: Option<Duration>,
}

impl GetCachedOptions {
    /// Options with the given TTL and no stale window
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
            stale_time: ttl,
            wait_timeout: None,
        }
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub(crate) fn effective_stale_time(&self) -> Duration {
        self.stale_time.min(self.ttl)
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A stored value with its freshness deadlines
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub value: V,
    pub refreshed_at: Instant,
    pub stale_at: Instant,
    pub expires_at: Instant,
    pub last_access: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, now: Instant, ttl: Duration, stale_time: Duration, access: u64) -> Self {
        let expires_at = now + ttl;
        Self {
            value,
            refreshed_at: now,
            stale_at: (now + stale_time).min(expires_at),
            expires_at,
            last_access: access,
        }
    }

    pub fn freshness(&self, now: Instant) -> Freshness {
        if now < self.stale_at {
            Freshness::Fresh
        } else if now < self.expires_at {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    Fresh,
    Stale,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_cache_stats_serialization() {
        let stats = CacheStats {
            entries: 3,
            capacity: 10,
            in_flight: 1,
            hits: 500,
            stale_hits: 7,
            misses: 50,
            evictions: 2,
        };

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"stale_hits\":7"));
        assert!(json.contains("\"capacity\":10"));
    }

    #[test]
    fn test_stale_time_is_clamped_to_ttl() {
        let opts = GetCachedOptions::new("k", Duration::from_secs(10))
            .stale_time(Duration::from_secs(60));
        assert_eq!(opts.effective_stale_time(), Duration::from_secs(10));
    }

    #[test]
    fn test_default_options_have_no_stale_window() {
        let opts = GetCachedOptions::new("k", Duration::from_secs(10));
        assert_eq!(opts.stale_time, opts.ttl);
        assert!(opts.wait_timeout.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_freshness_windows() {
        let now = Instant::now();
        let entry = CacheEntry::new(
            "v",
            now,
            Duration::from_millis(100),
            Duration::from_millis(50),
            0,
        );

        assert_eq!(entry.freshness(now), Freshness::Fresh);
        assert_eq!(entry.freshness(now + Duration::from_millis(49)), Freshness::Fresh);
        assert_eq!(entry.freshness(now + Duration::from_millis(50)), Freshness::Stale);
        assert_eq!(entry.freshness(now + Duration::from_millis(99)), Freshness::Stale);
        assert_eq!(entry.freshness(now + Duration::from_millis(100)), Freshness::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_stale_never_after_expiry() {
        let now = Instant::now();
        let entry = CacheEntry::new(
            1,
            now,
            Duration::from_millis(10),
            Duration::from_millis(500),
            0,
        );
        assert!(entry.stale_at <= entry.expires_at);
        assert_eq!(entry.refreshed_at, now);
    }
}
