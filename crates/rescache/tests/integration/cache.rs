use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rescache_test::{ManualRequest, StubRequest};

use rescache::{
    CacheConfig, CacheEntry, CacheError, CacheStatus, CancellationToken, ResourceCache,
    ResourceRequest,
};

#[tokio::test]
async fn test_fetch_resolves_and_is_cached() {
    rescache_test::setup();

    let request = StubRequest::ok(vec!["foo".to_string(), "bar".to_string()]);
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    assert!(!cache.ready());
    assert_eq!(cache.contents(), None);

    let contents = cache.get().await.unwrap();
    assert_eq!(contents, vec!["foo".to_string(), "bar".to_string()]);
    assert!(cache.ready());
    assert!(!cache.failed());
    assert_eq!(cache.contents(), Some(contents));

    // Served from the slot, without a second fetch.
    let contents = cache.get().await.unwrap();
    assert_eq!(contents, vec!["foo".to_string(), "bar".to_string()]);
    assert_eq!(request.fetches(), 1);
}

#[tokio::test]
async fn test_fetch_failure_is_recorded() {
    rescache_test::setup();

    let request: StubRequest<Vec<String>> = StubRequest::err("boom!");
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    let result = cache.get().await;
    assert_eq!(result, Err(CacheError::Fetch("boom!".into())));

    assert!(cache.failed());
    assert!(!cache.ready());
    assert_eq!(cache.failure(), Some(CacheError::Fetch("boom!".into())));
    assert_eq!(cache.failure_reason().as_deref(), Some("boom!"));
    assert_eq!(cache.contents(), None);
    assert_eq!(cache.status(), CacheStatus::Failed);
}

#[tokio::test]
async fn test_prime_is_single_flight() {
    rescache_test::setup();

    let (request, mut controls) = ManualRequest::new();
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    assert!(cache.prime());
    // Priming while a fetch is in flight must not start a second one.
    assert!(!cache.prime());
    assert_eq!(cache.status(), CacheStatus::Loading);

    controls.next_fetch().await.resolve("value".to_string());

    assert_eq!(cache.get().await, Ok("value".to_string()));
    assert!(!cache.prime());
    assert_eq!(request.fetches(), 1);
}

#[tokio::test]
async fn test_concurrent_gets_share_one_fetch() {
    rescache_test::setup();
    tokio::time::pause();

    let request = StubRequest::ok(42u32).with_delay(Duration::from_millis(100));
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    let (a, b, c) = futures::join!(cache.get(), cache.get(), cache.get());
    assert_eq!(a, Ok(42));
    assert_eq!(b, Ok(42));
    assert_eq!(c, Ok(42));
    assert_eq!(request.fetches(), 1);
}

#[tokio::test]
async fn test_invalidate_resets() {
    rescache_test::setup();

    let request = StubRequest::ok("payload".to_string());
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    cache.get().await.unwrap();
    assert!(cache.ready());

    cache.invalidate();
    assert!(!cache.ready());
    assert!(!cache.failed());
    assert_eq!(cache.contents(), None);
    assert_eq!(cache.status(), CacheStatus::Empty);

    // The next access fetches again.
    assert_eq!(cache.get().await, Ok("payload".to_string()));
    assert_eq!(request.fetches(), 2);
}

#[tokio::test]
async fn test_stale_completion_is_discarded() {
    rescache_test::setup();

    let (request, mut controls) = ManualRequest::new();
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    assert!(cache.prime());
    let first = controls.next_fetch().await;

    cache.invalidate();
    assert!(cache.prime());
    let second = controls.next_fetch().await;

    second.resolve("v2".to_string());
    assert_eq!(cache.get().await, Ok("v2".to_string()));

    // The superseded fetch lands late; its result must be thrown away.
    first.resolve("v1".to_string());
    rescache_test::settle().await;

    assert_eq!(cache.contents(), Some("v2".to_string()));
    assert_eq!(request.fetches(), 2);
}

#[tokio::test]
async fn test_invalidate_fails_pending_waiters() {
    rescache_test::setup();

    let (request, mut controls) = ManualRequest::new();
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    assert!(cache.prime());
    let handle = controls.next_fetch().await;

    let waiter = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get().await }
    });
    // Let the waiter register with the in-flight fetch.
    rescache_test::settle().await;

    cache.invalidate();
    assert!(handle.is_cancelled());
    assert_eq!(waiter.await.unwrap(), Err(CacheError::Invalidated));
    assert_eq!(cache.status(), CacheStatus::Empty);

    // The superseded fetch may still land; it is discarded.
    handle.resolve("late".to_string());
    rescache_test::settle().await;
    assert_eq!(cache.contents(), None);
    assert_eq!(request.fetches(), 1);
}

#[tokio::test]
async fn test_fetch_timeout_fails_the_slot() {
    rescache_test::setup();
    tokio::time::pause();

    let (request, mut controls) = ManualRequest::new();
    let config = CacheConfig {
        name: "slow".into(),
        fetch_timeout: Duration::from_millis(500),
    };
    let cache = ResourceCache::new(request.clone(), config);

    // The fetch never completes on its own, so the timeout has to fire.
    let result: CacheEntry<String> = cache.get().await;
    assert_eq!(result, Err(CacheError::Timeout(Duration::from_millis(500))));

    let handle = controls.next_fetch().await;
    assert!(handle.is_cancelled());

    assert!(cache.failed());
    let reason = cache.failure_reason().unwrap();
    assert!(reason.contains("timed out"), "unexpected reason: {reason}");

    // The slot accepts a fresh attempt after the timeout.
    assert!(cache.prime());
    let _second = controls.next_fetch().await;
    assert_eq!(request.fetches(), 2);
}

#[tokio::test]
async fn test_reprime_after_failure_fetches_again() {
    rescache_test::setup();

    let request: StubRequest<String> = StubRequest::err("first attempt failed");
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    let result = cache.get().await;
    assert_eq!(result, Err(CacheError::Fetch("first attempt failed".into())));
    assert!(cache.failed());

    request.set_outcome(Ok("recovered".to_string()));

    assert_eq!(cache.get().await, Ok("recovered".to_string()));
    assert!(cache.ready());
    assert_eq!(cache.failure_reason(), None);
    assert_eq!(request.fetches(), 2);
}

#[tokio::test]
async fn test_queries_do_not_fetch() {
    rescache_test::setup();

    let request: StubRequest<u32> = StubRequest::ok(1);
    let cache = ResourceCache::new(request.clone(), CacheConfig::default());

    assert_eq!(cache.contents(), None);
    assert!(!cache.ready());
    assert!(!cache.failed());
    assert_eq!(cache.failure_reason(), None);
    assert_eq!(cache.status(), CacheStatus::Empty);
    assert_eq!(request.fetches(), 0);
}

#[tokio::test]
async fn test_panicking_fetch_is_contained() {
    rescache_test::setup();

    struct Panicking;

    impl ResourceRequest for Panicking {
        type Resource = u32;

        fn fetch(&self, _cancel: CancellationToken) -> BoxFuture<'_, CacheEntry<u32>> {
            Box::pin(async { panic!("kaboom") })
        }
    }

    let cache = ResourceCache::new(Panicking, CacheConfig::default());
    assert_eq!(cache.get().await, Err(CacheError::InternalError));
    assert!(cache.failed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_gets_and_invalidations() {
    rescache_test::setup();

    let request =
        StubRequest::ok(Arc::new("payload".to_string())).with_delay(Duration::from_millis(1));
    let cache = ResourceCache::new(request.clone(), CacheConfig::named("hammer"));

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                match cache.get().await {
                    Ok(value) => assert_eq!(*value, "payload"),
                    Err(CacheError::Invalidated) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
                if worker == 0 && i % 10 == 0 {
                    cache.invalidate();
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Once the churn stops, the cache converges on the fetched value.
    assert_eq!(cache.get().await.unwrap().as_str(), "payload");
}

#[test]
fn test_error_display() {
    assert_eq!(CacheError::Fetch("boom!".into()).to_string(), "boom!");
    assert_eq!(
        CacheError::Timeout(Duration::from_secs(5)).to_string(),
        "fetch timed out after 5s"
    );
    assert_eq!(
        CacheError::Invalidated.to_string(),
        "invalidated while the fetch was pending"
    );
}

#[test]
fn test_internal_error_conversion() {
    let err = std::io::Error::other("disk on fire");
    assert_eq!(CacheError::from_std_error(err), CacheError::InternalError);
}
