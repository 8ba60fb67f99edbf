//! Rate limiting middleware.
//!
//! [`RateLimitLayer`] gates a service behind a [`RateLimitStore`] counter.
//! Each layer instance belongs to a [`LimiterClass`] (general API traffic,
//! authentication attempts, uploads, search) with its own limit and window;
//! sharing one store across layers keeps the classes independent because the
//! class name is part of the limiting key.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::RETRY_AFTER;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service, ServiceExt};

use crate::identity::ClientIdentity;
use crate::layer::BoxError;
use crate::rate_limit::{RateLimitDecision, RateLimitStore};

pub const HEADER_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Limiter classes with per-class default budgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimiterClass {
    General,
    Auth,
    Upload,
    Search,
}

impl LimiterClass {
    pub fn as_str(self) -> &'static str {
        match self {
            LimiterClass::General => "general",
            LimiterClass::Auth => "auth",
            LimiterClass::Upload => "upload",
            LimiterClass::Search => "search",
        }
    }

    pub fn default_limit(self) -> u32 {
        match self {
            LimiterClass::General => 100,
            LimiterClass::Auth => 5,
            LimiterClass::Upload => 20,
            LimiterClass::Search => 30,
        }
    }

    pub fn default_window(self) -> Duration {
        match self {
            LimiterClass::General => Duration::from_secs(60),
            LimiterClass::Auth => Duration::from_secs(300),
            LimiterClass::Upload => Duration::from_secs(3600),
            LimiterClass::Search => Duration::from_secs(60),
        }
    }
}

/// Derives the limiting key: `class:clientIP:userId`, with `unknown` /
/// `anonymous` fallbacks for absent identity parts.
fn limiter_key(class: LimiterClass, identity: &ClientIdentity) -> String {
    let ip = identity
        .ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_owned());
    let user = identity.user_id.as_deref().unwrap_or("anonymous");
    format!("{}:{}:{}", class.as_str(), ip, user)
}

/// Tower layer applying fixed-window rate limiting to a service.
#[derive(Clone)]
pub struct RateLimitLayer {
    store: RateLimitStore,
    class: LimiterClass,
    limit: u32,
    window: Duration,
}

impl RateLimitLayer {
    /// Creates a layer for `class` with its default limit and window.
    pub fn new(store: RateLimitStore, class: LimiterClass) -> Self {
        Self {
            store,
            class,
            limit: class.default_limit(),
            window: class.default_window(),
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            store: self.store.clone(),
            class: self.class,
            limit: self.limit,
            window: self.window,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    store: RateLimitStore,
    class: LimiterClass,
    limit: u32,
    window: Duration,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let identity = ClientIdentity::from_request(&req)
            .cloned()
            .unwrap_or_default();
        let key = limiter_key(self.class, &identity);
        let decision = self.store.check_and_increment(&key, self.limit, self.window);

        if !decision.allowed {
            #[cfg(feature = "metrics")]
            metrics::counter!("campus_gate.throttled").increment(1);

            #[cfg(feature = "tracing")]
            tracing::warn!(
                key = %key,
                retry_after = decision.retry_after_secs,
                "rate limit exceeded"
            );

            let mut response = Response::new(Full::from(Bytes::new()));
            *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            insert_rate_headers(response.headers_mut(), &decision);
            if let Some(secs) = decision.retry_after_secs {
                if let Ok(value) = HeaderValue::try_from(secs.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
            }
            return Box::pin(async move { Ok(response) });
        }

        let inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.oneshot(req).await.map_err(Into::into)?;
            let (mut parts, body) = response.into_parts();
            let bytes = BodyExt::collect(body).await.map_err(Into::into)?.to_bytes();

            insert_rate_headers(&mut parts.headers, &decision);
            Ok(Response::from_parts(parts, Full::from(bytes)))
        })
    }
}

fn insert_rate_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let reset_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + decision.reset_in.as_secs();

    for (name, value) in [
        (HEADER_RATELIMIT_LIMIT, decision.limit.to_string()),
        (HEADER_RATELIMIT_REMAINING, decision.remaining.to_string()),
        (HEADER_RATELIMIT_RESET, reset_epoch.to_string()),
    ] {
        if let Ok(value) = HeaderValue::try_from(value) {
            headers.insert(name, value);
        }
    }
}
