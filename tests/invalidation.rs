use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use campus_gate::prelude::*;
use http::{Method, Request, Response};
use bytes::Bytes;
use http_body_util::Full;
use tower::{service_fn, Layer, Service, ServiceExt};

fn get(uri: &str) -> Request<()> {
    Request::builder().uri(uri).body(()).expect("request builds")
}

fn post(uri: &str) -> Request<()> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(())
        .expect("request builds")
}

#[tokio::test]
async fn mutation_invalidates_previously_cached_route() {
    let layer = CacheLayer::builder(MemoryStore::new(128))
        .ttl(Duration::from_secs(300))
        .invalidate_on(["enrollment:updated"])
        .build();

    let counter = Arc::new(AtomicUsize::new(0));
    let mut reads = layer.clone().layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Infallible>(Response::new(Full::from(value.to_string())))
            }
        }
    }));

    let mut mutations = InvalidateLayer::new(layer.invalidator(), ["enrollment:updated"]).layer(
        service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Full::<Bytes>::from("enrolled")))
        }),
    );

    // Warm the cache.
    reads.ready().await.expect("service ready");
    reads.call(get("/roster")).await.expect("first read");
    reads.ready().await.expect("service ready");
    reads.call(get("/roster")).await.expect("cached read");
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // Fire the event through a successful mutation.
    mutations.ready().await.expect("service ready");
    mutations.call(post("/enrollments")).await.expect("mutation");

    reads.ready().await.expect("service ready");
    reads.call(get("/roster")).await.expect("read after mutation");
    assert_eq!(
        counter.load(Ordering::SeqCst),
        2,
        "mutation invalidated the cached roster"
    );
}

#[tokio::test]
async fn unrelated_routes_survive_an_invalidation_event() {
    let store = MemoryStore::new(128);
    let registry = InvalidationRegistry::new();

    let tracked_layer = CacheLayer::builder(store.clone())
        .ttl(Duration::from_secs(300))
        .registry(registry.clone())
        .invalidate_on(["enrollment:updated"])
        .build();
    let untracked_layer = CacheLayer::builder(store.clone())
        .ttl(Duration::from_secs(300))
        .registry(registry.clone())
        .build();

    let tracked_counter = Arc::new(AtomicUsize::new(0));
    let mut tracked = tracked_layer.clone().layer(service_fn({
        let counter = tracked_counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Infallible>(Response::new(Full::from(value.to_string())))
            }
        }
    }));

    let untracked_counter = Arc::new(AtomicUsize::new(0));
    let mut untracked = untracked_layer.layer(service_fn({
        let counter = untracked_counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Infallible>(Response::new(Full::from(value.to_string())))
            }
        }
    }));

    tracked.ready().await.expect("service ready");
    tracked.call(get("/roster")).await.expect("warm tracked");
    untracked.ready().await.expect("service ready");
    untracked.call(get("/calendar")).await.expect("warm untracked");

    tracked_layer.invalidator().invalidate("enrollment:updated").await;

    tracked.ready().await.expect("service ready");
    tracked.call(get("/roster")).await.expect("read tracked");
    untracked.ready().await.expect("service ready");
    untracked.call(get("/calendar")).await.expect("read untracked");

    assert_eq!(tracked_counter.load(Ordering::SeqCst), 2, "tracked re-fetched");
    assert_eq!(
        untracked_counter.load(Ordering::SeqCst),
        1,
        "untracked still cached"
    );
}

#[tokio::test]
async fn failed_mutations_leave_the_cache_warm() {
    let layer = CacheLayer::builder(MemoryStore::new(128))
        .ttl(Duration::from_secs(300))
        .invalidate_on(["fees:changed"])
        .build();

    let counter = Arc::new(AtomicUsize::new(0));
    let mut reads = layer.clone().layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Infallible>(Response::new(Full::from(value.to_string())))
            }
        }
    }));

    let mut mutations = InvalidateLayer::new(layer.invalidator(), ["fees:changed"]).layer(
        service_fn(|_req: Request<()>| async {
            let mut response = Response::new(Full::<Bytes>::from("invalid fee"));
            *response.status_mut() = http::StatusCode::UNPROCESSABLE_ENTITY;
            Ok::<_, Infallible>(response)
        }),
    );

    reads.ready().await.expect("service ready");
    reads.call(get("/fees")).await.expect("warm");

    mutations.ready().await.expect("service ready");
    mutations.call(post("/fees")).await.expect("failed mutation");

    reads.ready().await.expect("service ready");
    reads.call(get("/fees")).await.expect("read after failure");
    assert_eq!(counter.load(Ordering::SeqCst), 1, "cache untouched");
}

#[tokio::test]
async fn firing_an_event_twice_is_safe() {
    let layer = CacheLayer::builder(MemoryStore::new(128))
        .ttl(Duration::from_secs(300))
        .invalidate_on(["enrollment:updated"])
        .build();

    let counter = Arc::new(AtomicUsize::new(0));
    let mut reads = layer.clone().layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Infallible>(Response::new(Full::from(value.to_string())))
            }
        }
    }));

    reads.ready().await.expect("service ready");
    reads.call(get("/roster")).await.expect("warm");

    let invalidator = layer.invalidator();
    assert_eq!(invalidator.invalidate("enrollment:updated").await, 1);
    assert_eq!(invalidator.invalidate("enrollment:updated").await, 0);
    assert_eq!(invalidator.invalidate("never:registered").await, 0);
}
