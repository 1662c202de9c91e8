//! Helpers for testing resource caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all
//!    console output is captured by the test runner.
//!
//!  - [`StubRequest`] and [`ManualRequest`] are `Clone`, and their clones
//!    share state. Keep a clone outside the cache to read fetch counters or to
//!    swap outcomes mid-test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use rescache::{CacheEntry, CacheError, CancellationToken, ResourceRequest};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::filter::EnvFilter;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from this workspace's
///    crates and mutes everything else.
pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("rescache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Yields to the runtime a few times.
///
/// Use this after completing a fetch by hand to let the cache's spawned driver
/// tasks run before asserting on the outcome.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// A fetch stub that serves a configured outcome.
///
/// Every fetch is counted, optionally delayed, and completed with a clone of
/// the current outcome. The outcome can be swapped mid-test to script
/// failure-then-recovery sequences.
pub struct StubRequest<T> {
    outcome: Arc<Mutex<CacheEntry<T>>>,
    delay: Option<Duration>,
    fetches: Arc<AtomicUsize>,
}

impl<T> Clone for StubRequest<T> {
    fn clone(&self) -> Self {
        Self {
            outcome: Arc::clone(&self.outcome),
            delay: self.delay,
            fetches: Arc::clone(&self.fetches),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StubRequest<T> {
    /// Creates a stub that always resolves with `value`.
    pub fn ok(value: T) -> Self {
        Self::with_outcome(Ok(value))
    }

    /// Creates a stub that always rejects with `reason`.
    pub fn err(reason: &str) -> Self {
        Self::with_outcome(Err(CacheError::Fetch(reason.into())))
    }

    /// Creates a stub serving the given outcome.
    pub fn with_outcome(outcome: CacheEntry<T>) -> Self {
        Self {
            outcome: Arc::new(Mutex::new(outcome)),
            delay: None,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delays every fetch by `delay` before completing it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the outcome served by subsequent fetches.
    pub fn set_outcome(&self, outcome: CacheEntry<T>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    /// The number of times the cache invoked this fetch.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync + 'static> ResourceRequest for StubRequest<T> {
    type Resource = T;

    fn fetch(&self, _cancel: CancellationToken) -> BoxFuture<'_, CacheEntry<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.lock().unwrap().clone();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}

/// A fetch stub whose attempts are completed by hand.
///
/// Every fetch sends a [`FetchHandle`] through the paired [`FetchControls`]
/// and then waits until the test resolves or rejects it. This is the
/// instrument for exercising in-flight states: stale completions, waiter
/// delivery, and timeouts.
pub struct ManualRequest<T> {
    handles: mpsc::UnboundedSender<FetchHandle<T>>,
    fetches: Arc<AtomicUsize>,
}

impl<T> Clone for ManualRequest<T> {
    fn clone(&self) -> Self {
        Self {
            handles: self.handles.clone(),
            fetches: Arc::clone(&self.fetches),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ManualRequest<T> {
    /// Creates the stub and the controls used to complete its fetches.
    pub fn new() -> (Self, FetchControls<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = Self {
            handles: tx,
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        (request, FetchControls { handles: rx })
    }

    /// The number of times the cache invoked this fetch.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync + 'static> ResourceRequest for ManualRequest<T> {
    type Resource = T;

    fn fetch(&self, cancel: CancellationToken) -> BoxFuture<'_, CacheEntry<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (responder, rx) = oneshot::channel();
        self.handles.send(FetchHandle { responder, cancel }).ok();
        Box::pin(async move {
            match rx.await {
                Ok(entry) => entry,
                Err(_) => Err(CacheError::Fetch("fetch handle dropped".into())),
            }
        })
    }
}

/// Receives one [`FetchHandle`] per fetch attempt of a [`ManualRequest`].
pub struct FetchControls<T> {
    handles: mpsc::UnboundedReceiver<FetchHandle<T>>,
}

impl<T> FetchControls<T> {
    /// Waits for the next fetch attempt to start and returns its handle.
    pub async fn next_fetch(&mut self) -> FetchHandle<T> {
        self.handles.recv().await.expect("a fetch should have started")
    }
}

/// Completes a single in-flight fetch attempt of a [`ManualRequest`].
pub struct FetchHandle<T> {
    responder: oneshot::Sender<CacheEntry<T>>,
    cancel: CancellationToken,
}

impl<T> FetchHandle<T> {
    /// Resolves the attempt with `value`.
    pub fn resolve(self, value: T) {
        self.responder.send(Ok(value)).ok();
    }

    /// Rejects the attempt with `reason`.
    pub fn reject(self, reason: &str) {
        self.responder.send(Err(CacheError::Fetch(reason.into()))).ok();
    }

    /// Whether the attempt's cancellation token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
