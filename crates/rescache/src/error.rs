use std::time::Duration;

use thiserror::Error;

/// An error describing why a resource is not available in the cache.
///
/// Fetch failures land in the cache's `Failed` state and are delivered to
/// every caller waiting on the failing attempt; they never propagate up an
/// unrelated call stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The fetch reported a failure.
    ///
    /// The attached string is the reason given by the fetch implementation. It
    /// is treated as opaque and displayed verbatim.
    #[error("{0}")]
    Fetch(String),
    /// The fetch did not complete within the configured timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The pending fetch was invalidated before its result arrived.
    ///
    /// Only ever delivered to waiters of the superseded attempt; it is never
    /// stored in the cache slot.
    #[error("invalidated while the fetch was pending")]
    Invalidated,
    /// An unexpected error inside the cache itself, such as a panicking fetch.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    /// Creates a [`CacheError::InternalError`] from an unexpected error,
    /// logging the original.
    ///
    /// Intended for fetch implementations that run into errors which are not
    /// meaningful to users, like I/O failures while assembling a request.
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The outcome of a fetch attempt, either `Ok(T)` or an error denoting the
/// reason why the resource could not be fetched.
pub type CacheEntry<T = ()> = Result<T, CacheError>;
