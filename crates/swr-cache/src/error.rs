//! Error types for the cache

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Error returned by a fetch function, shared by every caller that waited on it
#[derive(Clone)]
pub struct FetchError(Arc<dyn StdError + Send + Sync>);

impl FetchError {
    pub fn new(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self(Arc::from(err.into()))
    }

    /// The error produced by the fetch function
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }

    /// Attempt to view the fetch function's error as a concrete type
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Whether two errors originate from the same fetch
    pub fn ptr_eq(&self, other: &FetchError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone)]
pub enum CacheError {
    /// Invalid construction options
    Config(String),
    InvalidKey,
    /// The fetch function failed
    Fetch(FetchError),
    /// Gave up waiting on an in-flight fetch
    Timeout(Duration),
    /// The fetch task panicked or was cancelled
    Aborted(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::InvalidKey => write!(f, "Cache key must not be empty"),
            CacheError::Fetch(err) => write!(f, "{}", err),
            CacheError::Timeout(after) => {
                write!(f, "Timed out after {:?} waiting for in-flight fetch", after)
            }
            CacheError::Aborted(msg) => write!(f, "Fetch aborted: {}", msg),
        }
    }
}

impl StdError for CacheError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CacheError::Fetch(err) => Some(err.inner()),
            _ => None,
        }
    }
}

impl From<FetchError> for CacheError {
    fn from(err: FetchError) -> Self {
        CacheError::Fetch(err)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
