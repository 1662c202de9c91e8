//! A lazily primed, single-flight, invalidatable cache for server-backed
//! singleton resources.
//!
//! UIs and services frequently hold on to remote singletons, such as settings
//! objects or usage dashboards, that are expensive to fetch and must not be
//! re-fetched on every access. [`ResourceCache`] owns one logical slot for
//! such a resource and makes three guarantees:
//!
//! - **At most one fetch is in flight per slot.** Priming a loading cache
//!   never starts a second fetch; concurrent callers are registered as
//!   waiters and all receive the outcome of the one in-flight attempt.
//! - **Every view of the slot is consistent.** All state lives behind one
//!   mutex; [`contents`](ResourceCache::contents),
//!   [`ready`](ResourceCache::ready), [`failed`](ResourceCache::failed) and
//!   friends never observe a torn intermediate state.
//! - **A superseded fetch can never resurrect stale data.** Every fetch
//!   attempt captures a generation number. [`invalidate`](ResourceCache::invalidate)
//!   and every new fetch bump the generation, and a completion whose captured
//!   generation no longer matches is silently discarded.
//!
//! # State machine
//!
//! A cache is always in one of four states:
//!
//! | State     | Meaning                                      | Transitions |
//! |-----------|----------------------------------------------|-------------|
//! | `Empty`   | never fetched, or invalidated                | → `Loading` on prime |
//! | `Loading` | a fetch is in flight                         | → `Ready` on success, → `Failed` on error or timeout, → `Empty` on invalidate |
//! | `Ready`   | the slot holds the last fetched value        | → `Empty` on invalidate |
//! | `Failed`  | the last attempt errored                     | → `Loading` on re-prime, → `Empty` on invalidate |
//!
//! The fetch itself is described by a [`ResourceRequest`] implementation and
//! always executes outside the lock, in its own task, bounded by the
//! [`CacheConfig::fetch_timeout`]. Each attempt receives a
//! [`CancellationToken`] that fires when the attempt is superseded or times
//! out; observing it is optional, since the result of a superseded attempt is
//! discarded either way (cancellation is cooperative, never preemptive).
//!
//! Failures are ordinary values here: a failed fetch parks the cache in
//! `Failed` with a [`CacheError`] that pollers can render via
//! [`failure_reason`](ResourceCache::failure_reason). The cache never retries
//! by itself; the next [`prime`](ResourceCache::prime) or
//! [`get`](ResourceCache::get) does.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use futures::future::BoxFuture;
//! use rescache::{CacheConfig, CacheEntry, CancellationToken, ResourceCache, ResourceRequest};
//!
//! struct PluginSettings;
//!
//! impl ResourceRequest for PluginSettings {
//!     type Resource = Arc<Vec<String>>;
//!
//!     fn fetch(&self, _cancel: CancellationToken) -> BoxFuture<'_, CacheEntry<Self::Resource>> {
//!         Box::pin(async move {
//!             // Really an HTTP call.
//!             Ok(Arc::new(vec!["analytics".to_string()]))
//!         })
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = ResourceCache::new(PluginSettings, CacheConfig::named("plugin-settings"));
//!
//! let settings = cache.get().await.unwrap();
//! assert_eq!(settings[0], "analytics");
//! assert!(cache.ready());
//!
//! cache.invalidate();
//! assert!(!cache.ready());
//! # }
//! ```
//!
//! # Metrics
//!
//! With [`metrics::configure_statsd`] called at startup, caches emit
//! `cache.access` (tagged with `outcome`: `hit`, `coalesced` or `miss`),
//! `cache.fetch`, `cache.fetch.stale`, `cache.fetch.failure` and
//! `cache.invalidate` counters, plus timing for the fetch itself. All series
//! are tagged with the cache's configured name.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod cache;
mod config;
mod error;
mod request;
mod utils;

pub use cache::{CacheStatus, ResourceCache};
pub use config::CacheConfig;
pub use error::{CacheEntry, CacheError};
pub use request::{CancellationToken, ResourceRequest};
