use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::error::{CacheEntry, CacheError};
use crate::request::ResourceRequest;
use crate::utils::futures::{CancelOnDrop, m, measure};

/// A snapshot of a cache's state, as returned by [`ResourceCache::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// Never fetched, or invalidated.
    Empty,
    /// A fetch is in flight.
    Loading,
    /// The slot holds a fetched value.
    Ready,
    /// The last fetch attempt errored.
    Failed,
}

/// The single slot guarded by the cache mutex.
enum Slot<T> {
    Empty,
    Loading {
        /// Cancellation signal handed to the in-flight fetch.
        cancel: CancellationToken,
        /// Callers awaiting the outcome of the in-flight fetch.
        waiters: Vec<oneshot::Sender<CacheEntry<T>>>,
    },
    Ready(T),
    Failed(CacheError),
}

struct Inner<T> {
    /// Incremented whenever a fetch starts or the slot is invalidated.
    ///
    /// A completion only applies if its captured generation still matches.
    generation: u64,
    slot: Slot<T>,
}

/// A lazily primed, single-flight cache holding one server-backed resource.
///
/// The cache wraps a [`ResourceRequest`] and coordinates at most one in-flight
/// fetch for its single slot. See the [crate docs](crate) for the state
/// machine and the concurrency discipline.
///
/// Cloning is cheap and hands out another handle to the same slot.
pub struct ResourceCache<R: ResourceRequest> {
    config: CacheConfig,
    request: Arc<R>,
    inner: Arc<Mutex<Inner<R::Resource>>>,
}

// Implemented by hand to avoid the derive putting a `Clone` bound on `R`:
// https://github.com/rust-lang/rust/issues/26925
impl<R: ResourceRequest> Clone for ResourceCache<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            request: Arc::clone(&self.request),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ResourceRequest> fmt::Debug for ResourceCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("name", &self.config.name)
            .field("status", &self.status())
            .finish()
    }
}

impl<R: ResourceRequest> ResourceCache<R> {
    /// Creates an empty cache over the given request.
    ///
    /// Nothing is fetched until the cache is primed.
    pub fn new(request: R, config: CacheConfig) -> Self {
        Self {
            config,
            request: Arc::new(request),
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                slot: Slot::Empty,
            })),
        }
    }

    /// Ensures a value is being fetched or is already available.
    ///
    /// Returns `true` iff this call started a fetch. Priming a `Ready` cache
    /// is a no-op, and priming while a fetch is in flight never starts a
    /// second one. Priming a `Failed` cache discards the error and starts a
    /// fresh attempt.
    ///
    /// This is fire-and-forget: the outcome is observed through [`get`],
    /// [`contents`], [`ready`], [`failed`] and friends.
    ///
    /// # Panics
    ///
    /// Panics if called from outside of a Tokio runtime.
    ///
    /// [`get`]: Self::get
    /// [`contents`]: Self::contents
    /// [`ready`]: Self::ready
    /// [`failed`]: Self::failed
    pub fn prime(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.slot {
            Slot::Ready(_) => {
                metric!(counter("cache.access") += 1, "cache" => &self.config.name, "outcome" => "hit");
                false
            }
            Slot::Loading { .. } => {
                metric!(counter("cache.access") += 1, "cache" => &self.config.name, "outcome" => "coalesced");
                false
            }
            Slot::Empty | Slot::Failed(_) => {
                metric!(counter("cache.access") += 1, "cache" => &self.config.name, "outcome" => "miss");
                self.start_fetch(&mut inner, None);
                true
            }
        }
    }

    /// Returns the cached resource, fetching it if necessary.
    ///
    /// This is [`prime`](Self::prime) with deferred delivery of the outcome:
    ///
    /// - `Ready`: resolves immediately with a clone of the cached value.
    /// - `Loading`: waits for the in-flight fetch and resolves with its
    ///   outcome, without starting a second fetch.
    /// - `Empty` or `Failed`: starts a fetch and resolves with its outcome.
    ///
    /// When the awaited attempt is superseded by
    /// [`invalidate`](Self::invalidate), this resolves with
    /// [`CacheError::Invalidated`] instead of hanging or delivering a stale
    /// value.
    ///
    /// # Panics
    ///
    /// Panics if called from outside of a Tokio runtime.
    pub async fn get(&self) -> CacheEntry<R::Resource> {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            match &mut inner.slot {
                Slot::Ready(value) => {
                    metric!(counter("cache.access") += 1, "cache" => &self.config.name, "outcome" => "hit");
                    return Ok(value.clone());
                }
                Slot::Loading { waiters, .. } => {
                    metric!(counter("cache.access") += 1, "cache" => &self.config.name, "outcome" => "coalesced");
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
                Slot::Empty | Slot::Failed(_) => {
                    metric!(counter("cache.access") += 1, "cache" => &self.config.name, "outcome" => "miss");
                    let (tx, rx) = oneshot::channel();
                    self.start_fetch(&mut inner, Some(tx));
                    rx
                }
            }
        };

        match rx.await {
            Ok(entry) => entry,
            // The senders were dropped: the attempt was thrown away by
            // `invalidate` before it completed.
            Err(_) => Err(CacheError::Invalidated),
        }
    }

    /// Returns a clone of the cached value, or `None` unless the cache is
    /// `Ready`.
    ///
    /// Never blocks and never triggers a fetch.
    pub fn contents(&self) -> Option<R::Resource> {
        let inner = self.inner.lock().unwrap();
        match &inner.slot {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether the cache holds a fetched value.
    pub fn ready(&self) -> bool {
        matches!(self.inner.lock().unwrap().slot, Slot::Ready(_))
    }

    /// Whether the last fetch attempt errored.
    pub fn failed(&self) -> bool {
        matches!(self.inner.lock().unwrap().slot, Slot::Failed(_))
    }

    /// The error of the last fetch attempt, present iff the cache is `Failed`.
    pub fn failure(&self) -> Option<CacheError> {
        let inner = self.inner.lock().unwrap();
        match &inner.slot {
            Slot::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// A human-readable reason for the last failure, present iff the cache is
    /// `Failed`.
    ///
    /// For failures reported by the fetch itself this is the rejection
    /// message verbatim; timeouts render a timeout-specific message.
    pub fn failure_reason(&self) -> Option<String> {
        self.failure().map(|error| error.to_string())
    }

    /// The current state of the slot.
    pub fn status(&self) -> CacheStatus {
        match self.inner.lock().unwrap().slot {
            Slot::Empty => CacheStatus::Empty,
            Slot::Loading { .. } => CacheStatus::Loading,
            Slot::Ready(_) => CacheStatus::Ready,
            Slot::Failed(_) => CacheStatus::Failed,
        }
    }

    /// Drops the cached value or error and resets the cache to `Empty`.
    ///
    /// An in-flight fetch is not aborted; its cancellation token is cancelled
    /// and its eventual result is discarded by the generation check.
    /// Callers waiting on that fetch receive [`CacheError::Invalidated`].
    pub fn invalidate(&self) {
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            inner.generation += 1;
            std::mem::replace(&mut inner.slot, Slot::Empty)
        };

        let state = match &previous {
            Slot::Empty => "empty",
            Slot::Loading { .. } => "loading",
            Slot::Ready(_) => "ready",
            Slot::Failed(_) => "failed",
        };
        metric!(counter("cache.invalidate") += 1, "cache" => &self.config.name, "state" => state);
        tracing::debug!(cache = %self.config.name, state, "cache invalidated");

        // Cooperative cancellation only: signal the fetch, do not abort it.
        // Dropping `previous` here also drops the waiter senders, which fails
        // the corresponding `get` calls with `Invalidated`.
        if let Slot::Loading { cancel, .. } = previous {
            cancel.cancel();
        }
    }

    /// Transitions the slot to `Loading` and spawns the fetch driver.
    ///
    /// Must be called while holding the lock, with the slot in `Empty` or
    /// `Failed`. The optional `waiter` is registered for the new attempt.
    fn start_fetch(
        &self,
        inner: &mut Inner<R::Resource>,
        waiter: Option<oneshot::Sender<CacheEntry<R::Resource>>>,
    ) {
        inner.generation += 1;
        let generation = inner.generation;

        let cancel = CancellationToken::new();
        let mut waiters = Vec::new();
        waiters.extend(waiter);
        inner.slot = Slot::Loading {
            cancel: cancel.clone(),
            waiters,
        };

        metric!(counter("cache.fetch") += 1, "cache" => &self.config.name);
        tracing::debug!(cache = %self.config.name, generation, "starting resource fetch");

        let slf = self.clone();
        tokio::spawn(async move {
            let result = slf.run_fetch(cancel).await;
            slf.complete(generation, result);
        });
    }

    /// Runs the fetch in its own task, bounded by the configured timeout.
    ///
    /// Spawning isolates panics: a panicking fetch surfaces as
    /// [`CacheError::InternalError`] instead of wedging the slot in `Loading`.
    async fn run_fetch(&self, cancel: CancellationToken) -> CacheEntry<R::Resource> {
        let timeout = self.config.fetch_timeout;
        let request = Arc::clone(&self.request);

        let job_cancel = cancel.clone();
        let job = async move { request.fetch(job_cancel).await };
        let job = CancelOnDrop::new(tokio::spawn(job));
        let job = tokio::time::timeout(timeout, job);
        let job = measure("cache.fetch", m::timed_result, job);

        match job.await {
            // Timeout: `CancelOnDrop` has aborted the fetch task; cancel the
            // token as well for any side work the fetch may have started.
            Err(_) => {
                cancel.cancel();
                Err(CacheError::Timeout(timeout))
            }
            // Join error: the fetch task panicked or was aborted.
            Ok(Err(_)) => Err(CacheError::InternalError),
            Ok(Ok(entry)) => entry,
        }
    }

    /// Applies a fetch outcome, unless the attempt has been superseded.
    fn complete(&self, generation: u64, result: CacheEntry<R::Resource>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation {
            metric!(counter("cache.fetch.stale") += 1, "cache" => &self.config.name);
            tracing::debug!(
                cache = %self.config.name,
                generation,
                current = inner.generation,
                "discarding stale fetch result"
            );
            return;
        }

        let waiters = match &mut inner.slot {
            Slot::Loading { waiters, .. } => std::mem::take(waiters),
            // Leaving `Loading` always bumps the generation, so a matching
            // generation implies the slot is still `Loading`.
            _ => unreachable!("fetch completion for a slot that is not loading"),
        };

        inner.slot = match result.clone() {
            Ok(value) => {
                tracing::debug!(cache = %self.config.name, generation, "resource fetch succeeded");
                Slot::Ready(value)
            }
            Err(error) => {
                metric!(counter("cache.fetch.failure") += 1, "cache" => &self.config.name);
                tracing::debug!(
                    cache = %self.config.name,
                    generation,
                    error = %error,
                    "resource fetch failed"
                );
                Slot::Failed(error)
            }
        };
        drop(inner);

        // Notify after the slot is updated, so waiters that immediately poll
        // `ready()` or `contents()` observe the new state.
        for waiter in waiters {
            waiter.send(result.clone()).ok();
        }
    }
}
