use futures::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;

use crate::error::CacheEntry;

/// A request for a server-backed resource that a
/// [`ResourceCache`](crate::ResourceCache) can fetch and hold.
///
/// Implementors describe *how* to obtain the resource, typically by performing
/// an HTTP call. The cache decides *when* to run the fetch and guarantees that
/// at most one attempt is in flight per slot.
///
/// The returned future resolves exactly once, either with the fetched resource
/// or with a [`CacheError`](crate::CacheError). A future that never resolves
/// leaves the slot loading until the configured fetch timeout fires.
pub trait ResourceRequest: Send + Sync + 'static {
    /// The type of the cached resource.
    ///
    /// The resource is cloned out of the cache on every access and into every
    /// waiting caller, so it must be cheap to clone. Wrap large payloads in an
    /// [`Arc`](std::sync::Arc).
    type Resource: Clone + Send + Sync + 'static;

    /// Fetches the resource.
    ///
    /// The `cancel` token fires when the attempt is superseded by
    /// [`invalidate`](crate::ResourceCache::invalidate) or runs into the fetch
    /// timeout. Observing it is optional: cancellation is cooperative, and the
    /// result of a superseded attempt is discarded either way.
    fn fetch(&self, cancel: CancellationToken) -> BoxFuture<'_, CacheEntry<Self::Resource>>;
}
