use std::error::Error as StdError;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service, ServiceExt};

use crate::codec::{Codec, IdentityCodec};
use crate::error::GateError;
use crate::events::{InvalidationRegistry, Invalidator};
use crate::fingerprint::{self, fingerprint};
use crate::identity::ClientIdentity;
use crate::key::KeyExtractor;
use crate::policy::CachePolicy;
use crate::store::{CacheBackend, CacheEntry, MemoryStore};

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Response header tagging every response as a cache hit or miss.
pub const HEADER_X_CACHE: &str = "x-cache";

/// Configurable caching layer for Tower services.
///
/// The layer wraps an inner service and caches responses according to its
/// [`CachePolicy`]. Create instances via [`CacheLayer::builder`] or
/// [`CacheLayer::new`] for the default policy.
///
/// Cloning a `CacheLayer` is cheap and shares the underlying store and
/// invalidation registry.
#[derive(Clone)]
pub struct CacheLayer<B, C = IdentityCodec> {
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
    registry: InvalidationRegistry,
    codec: C,
}

/// Builder for configuring [`CacheLayer`] instances.
pub struct CacheLayerBuilder<B, C = IdentityCodec> {
    backend: B,
    policy: CachePolicy,
    key_extractor: Option<KeyExtractor>,
    registry: Option<InvalidationRegistry>,
    codec: C,
}

impl<B> CacheLayerBuilder<B, IdentityCodec>
where
    B: CacheBackend,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            policy: CachePolicy::default(),
            key_extractor: None,
            registry: None,
            codec: IdentityCodec,
        }
    }
}

impl<B, C> CacheLayerBuilder<B, C>
where
    B: CacheBackend,
    C: Codec,
{
    /// Replaces the cache policy with a pre-built value.
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the entry TTL; wins over a configured freshness tier.
    pub fn ttl(mut self, ttl: std::time::Duration) -> Self {
        self.policy = self.policy.with_ttl(ttl);
        self
    }

    pub fn tier(mut self, tier: crate::policy::FreshnessTier) -> Self {
        self.policy = self.policy.with_tier(tier);
        self
    }

    /// Header names whose values become part of the cache key.
    pub fn vary_by<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy = self.policy.with_vary_by(headers);
        self
    }

    /// Events whose firing drops this route's cached entries.
    pub fn invalidate_on<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy = self.policy.with_invalidate_on(events);
        self
    }

    pub fn roles(mut self, roles: crate::policy::RolePolicy) -> Self {
        self.policy = self.policy.with_roles(roles);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.policy = self.policy.with_compress(compress);
        self
    }

    pub fn should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method, &Uri, StatusCode) -> bool + Send + Sync + 'static,
    {
        self.policy = self.policy.with_should_cache(predicate);
        self
    }

    pub fn method_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        self.policy = self.policy.with_method_predicate(predicate);
        self
    }

    /// Replaces the key derivation algorithm entirely.
    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = Some(extractor);
        self
    }

    /// Shares an invalidation registry across layers so routes can register
    /// keys under common event names.
    pub fn registry(mut self, registry: InvalidationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Supplies the codec used when `compress` is enabled.
    pub fn codec<C2>(self, codec: C2) -> CacheLayerBuilder<B, C2>
    where
        C2: Codec,
    {
        CacheLayerBuilder {
            backend: self.backend,
            policy: self.policy,
            key_extractor: self.key_extractor,
            registry: self.registry,
            codec,
        }
    }

    pub fn build(self) -> CacheLayer<B, C> {
        // Unless replaced, the key algorithm varies on the policy's headers.
        let key_extractor = self
            .key_extractor
            .unwrap_or_else(|| KeyExtractor::vary_by(self.policy.vary_by().iter().cloned()));

        CacheLayer {
            backend: self.backend,
            policy: self.policy,
            key_extractor,
            registry: self.registry.unwrap_or_default(),
            codec: self.codec,
        }
    }
}

impl CacheLayer<MemoryStore> {
    /// Creates a cache layer backed by an in-memory [`MemoryStore`].
    pub fn new_in_memory(capacity: usize) -> Self {
        CacheLayerBuilder::new(MemoryStore::new(capacity)).build()
    }
}

impl<B> CacheLayer<B>
where
    B: CacheBackend,
{
    /// Builds a cache layer with the default [`CachePolicy`].
    pub fn new(backend: B) -> Self {
        CacheLayerBuilder::new(backend).build()
    }

    /// Returns a builder for fine-grained control over the cache policy.
    pub fn builder(backend: B) -> CacheLayerBuilder<B> {
        CacheLayerBuilder::new(backend)
    }
}

impl<B, C> CacheLayer<B, C>
where
    B: CacheBackend,
    C: Codec,
{
    /// The registry this layer registers invalidation keys in.
    pub fn registry(&self) -> &InvalidationRegistry {
        &self.registry
    }

    /// An [`Invalidator`] sharing this layer's store and registry, for
    /// wiring mutation routes or firing events by hand.
    pub fn invalidator(&self) -> Invalidator<B> {
        Invalidator::new(self.backend.clone(), self.registry.clone())
    }
}

impl<S, B, C> Layer<S> for CacheLayer<B, C>
where
    B: CacheBackend,
    C: Codec,
{
    type Service = CacheService<S, B, C>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            backend: self.backend.clone(),
            policy: self.policy.clone(),
            key_extractor: self.key_extractor.clone(),
            registry: self.registry.clone(),
            codec: self.codec.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S, B, C = IdentityCodec> {
    inner: S,
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
    registry: InvalidationRegistry,
    codec: C,
}

impl<S, B, C, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S, B, C>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
    B: CacheBackend,
    C: Codec,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let role = ClientIdentity::from_request(&req).and_then(|id| id.role.clone());

        let eligible = self.policy.should_cache_method(&method)
            && self.policy.role_allows(role.as_deref());
        let key = if eligible {
            self.key_extractor.extract(&method, &uri, req.headers())
        } else {
            None
        };
        let if_none_match = req
            .headers()
            .get(IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let backend = self.backend.clone();
        let policy = self.policy.clone();
        let registry = self.registry.clone();
        let codec = self.codec.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            #[cfg(feature = "tracing")]
            tracing::debug!(method = %method, uri = %uri, cached_lookup = key.is_some(), "cache_call");

            if let Some(ref key_ref) = key {
                match backend.get(key_ref).await {
                    Ok(Some(entry)) => {
                        if let Some(ref candidates) = if_none_match {
                            if fingerprint::matches(candidates, &entry.fingerprint) {
                                #[cfg(feature = "metrics")]
                                metrics::counter!("campus_gate.revalidated").increment(1);
                                return Ok(not_modified(&entry.fingerprint));
                            }
                        }

                        match hit_response(entry, &codec) {
                            Ok(response) => {
                                #[cfg(feature = "metrics")]
                                metrics::counter!("campus_gate.hit").increment(1);
                                return Ok(response);
                            }
                            Err(_err) => {
                                // Undecodable entry: drop it and rebuild from
                                // the handler instead of failing the request.
                                #[cfg(feature = "tracing")]
                                tracing::warn!(key = %key_ref, error = %_err, "cached entry unusable; refetching");
                                let _ = backend.delete(key_ref).await;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(key = %key_ref, error = %_err, "cache lookup failed; serving uncached");
                    }
                }
            }

            #[cfg(feature = "metrics")]
            metrics::counter!("campus_gate.miss").increment(1);

            let response = inner.oneshot(req).await.map_err(Into::into)?;
            let (mut parts, body) = response.into_parts();
            let bytes = BodyExt::collect(body).await.map_err(Into::into)?.to_bytes();

            if let Some(key_ref) = &key {
                if policy.response_cacheable(&method, &uri, parts.status) {
                    let fp = fingerprint(&bytes);
                    match build_entry(&policy, &codec, parts.status, &parts.headers, bytes.clone(), fp.clone()) {
                        Ok(entry) => {
                            match backend
                                .set(key_ref.clone(), entry, Some(policy.effective_ttl()))
                                .await
                            {
                                Ok(()) => {
                                    for event in policy.invalidate_on() {
                                        registry.register(event, key_ref.clone());
                                    }
                                    if let Ok(value) =
                                        HeaderValue::try_from(fingerprint::etag_value(&fp))
                                    {
                                        parts.headers.insert(ETAG, value);
                                    }
                                    #[cfg(feature = "metrics")]
                                    metrics::counter!("campus_gate.store").increment(1);
                                }
                                Err(_err) => {
                                    #[cfg(feature = "tracing")]
                                    tracing::warn!(key = %key_ref, error = %_err, "cache store failed");
                                }
                            }
                        }
                        Err(_err) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(key = %key_ref, error = %_err, "codec failed; response not cached");
                        }
                    }
                }
            }

            parts
                .headers
                .insert(HEADER_X_CACHE, HeaderValue::from_static("MISS"));
            Ok(Response::from_parts(parts, Full::from(bytes)))
        })
    }
}

/// Empty-bodied `304 Not Modified` for a matching conditional request.
fn not_modified(fp: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(Bytes::new()));
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    if let Ok(value) = HeaderValue::try_from(fingerprint::etag_value(fp)) {
        response.headers_mut().insert(ETAG, value);
    }
    response
        .headers_mut()
        .insert(HEADER_X_CACHE, HeaderValue::from_static("HIT"));
    response
}

fn hit_response<C>(mut entry: CacheEntry, codec: &C) -> Result<Response<Full<Bytes>>, GateError>
where
    C: Codec,
{
    if entry.compressed {
        entry.body = codec.decompress(entry.body)?;
        entry.compressed = false;
    }

    let fp = entry.fingerprint.clone();
    let mut response = entry.into_response();
    if let Ok(value) = HeaderValue::try_from(fingerprint::etag_value(&fp)) {
        response.headers_mut().insert(ETAG, value);
    }
    response
        .headers_mut()
        .insert(HEADER_X_CACHE, HeaderValue::from_static("HIT"));
    Ok(response)
}

fn build_entry<C>(
    policy: &CachePolicy,
    codec: &C,
    status: StatusCode,
    headers: &HeaderMap,
    bytes: Bytes,
    fp: String,
) -> Result<CacheEntry, GateError>
where
    C: Codec,
{
    let captured: Vec<(String, Vec<u8>)> = headers
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
        .collect();

    if policy.compress() {
        let packed = codec.compress(bytes)?;
        Ok(CacheEntry::new(status, captured, packed, fp).with_compressed(true))
    } else {
        Ok(CacheEntry::new(status, captured, bytes, fp))
    }
}
