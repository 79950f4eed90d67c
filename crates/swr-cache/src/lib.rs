//! Typed in-memory cache with stale-while-revalidate semantics
//!
//! Values are produced by a caller-supplied fetch function. Concurrent
//! requests for a missing or expired key share one fetch, stale values are
//! served immediately while a background refresh runs, and the number of
//! entries is bounded with least-recently-used eviction.

mod cache;
mod error;
mod types;

pub use cache::SwrCache;
pub use error::{CacheError, FetchError, Result};
pub use types::{CacheOptions, CacheStats, GetCachedOptions};
