//! Event-driven cache invalidation.
//!
//! Routes that store cacheable responses register their keys under named
//! application events (`"enrollment:updated"`, `"fees:changed"`, …). When a
//! mutation fires an event, every key registered under it is dropped from the
//! store. [`InvalidateLayer`] wraps mutation handlers and fires configured
//! events automatically after a successful response.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use tower::{Layer, Service, ServiceExt};

use crate::store::CacheBackend;

/// Thread-safe mapping from event name to the cache keys it invalidates.
///
/// Keys accumulate across requests and routes sharing an event name. Firing
/// an event consumes its whole set; the set is detached from the map before
/// any deletion, so no partial invalidation is observable.
#[derive(Clone, Default)]
pub struct InvalidationRegistry {
    events: Arc<DashMap<String, HashSet<String>>>,
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` for invalidation when `event` fires.
    pub fn register(&self, event: &str, key: String) {
        self.events.entry(event.to_owned()).or_default().insert(key);
    }

    /// Detaches and returns the key set for `event`; empty for unknown events.
    pub fn take(&self, event: &str) -> Vec<String> {
        self.events
            .remove(event)
            .map(|(_, keys)| keys.into_iter().collect())
            .unwrap_or_default()
    }

    /// Currently registered keys for `event`, without consuming them.
    pub fn keys_for(&self, event: &str) -> Vec<String> {
        self.events
            .get(event)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of events with at least one registered key.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&self) {
        self.events.clear();
    }
}

/// Deletes registered keys from a [`CacheBackend`] when events fire.
#[derive(Clone)]
pub struct Invalidator<B> {
    backend: B,
    registry: InvalidationRegistry,
}

impl<B> Invalidator<B>
where
    B: CacheBackend,
{
    pub fn new(backend: B, registry: InvalidationRegistry) -> Self {
        Self { backend, registry }
    }

    pub fn registry(&self) -> &InvalidationRegistry {
        &self.registry
    }

    /// Fires `event`: every key registered under it is deleted from the
    /// store and the event's set is cleared. Returns the number of keys
    /// dropped. Firing an event with no registered keys is a no-op.
    pub async fn invalidate(&self, event: &str) -> usize {
        let keys = self.registry.take(event);
        let mut dropped = 0;

        // One failed delete must not strand the remaining keys.
        for key in keys {
            match self.backend.delete(&key).await {
                Ok(()) => dropped += 1,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(event, key = %key, error = %_err, "cache invalidation failed for key");
                }
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("campus_gate.invalidate").increment(dropped as u64);

        #[cfg(feature = "tracing")]
        tracing::debug!(event, dropped, "invalidation event fired");

        dropped
    }

    /// Fires each event in order, returning the total keys dropped.
    pub async fn invalidate_all<I, S>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dropped = 0;
        for event in events {
            dropped += self.invalidate(event.as_ref()).await;
        }
        dropped
    }
}

/// Middleware that fires invalidation events after successful mutations.
///
/// Wraps a mutation-route handler; when the handler responds with a status
/// below 400, the configured events fire through the shared [`Invalidator`].
#[derive(Clone)]
pub struct InvalidateLayer<B> {
    invalidator: Invalidator<B>,
    events: Arc<[String]>,
}

impl<B> InvalidateLayer<B>
where
    B: CacheBackend,
{
    pub fn new<I, S>(invalidator: Invalidator<B>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            invalidator,
            events: events.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S, B> Layer<S> for InvalidateLayer<B>
where
    B: CacheBackend,
{
    type Service = InvalidateService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        InvalidateService {
            inner,
            invalidator: self.invalidator.clone(),
            events: self.events.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InvalidateService<S, B> {
    inner: S,
    invalidator: Invalidator<B>,
    events: Arc<[String]>,
}

impl<S, B, ReqBody, ResBody> Service<Request<ReqBody>> for InvalidateService<S, B>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
    B: CacheBackend,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let inner = self.inner.clone();
        let invalidator = self.invalidator.clone();
        let events = self.events.clone();

        Box::pin(async move {
            let response = inner.oneshot(req).await?;

            // Failed mutations leave the cache as-is.
            if response.status().as_u16() < 400 {
                invalidator.invalidate_all(events.iter()).await;
            }

            Ok(response)
        })
    }
}
