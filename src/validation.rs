//! Request validation for mutation routes.
//!
//! [`ValidationLayer`] rejects malformed requests before the handler runs:
//! a declared body larger than the configured maximum draws `413`, a
//! content type outside the allow-list draws `415`, and a missing required
//! header draws `400`. Requests that pass are forwarded untouched.

use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service, ServiceExt};

use crate::layer::BoxError;

/// Tower layer enforcing request shape checks.
#[derive(Clone, Default)]
pub struct ValidationLayer {
    max_body_bytes: Option<u64>,
    allowed_content_types: Option<Arc<[String]>>,
    required_headers: Arc<[String]>,
}

impl ValidationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects requests declaring a body larger than `max` bytes with `413`.
    pub fn max_body_bytes(mut self, max: u64) -> Self {
        self.max_body_bytes = Some(max);
        self
    }

    /// Restricts `Content-Type` on body-bearing requests; prefixes match, so
    /// `application/json` accepts `application/json; charset=utf-8`.
    pub fn allow_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_content_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Headers that must be present, else `400`.
    pub fn require_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    fn check(&self, headers: &HeaderMap) -> Option<(StatusCode, &'static str)> {
        if let Some(max) = self.max_body_bytes {
            let declared = headers
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            if declared.is_some_and(|len| len > max) {
                return Some((StatusCode::PAYLOAD_TOO_LARGE, "request body too large"));
            }
        }

        if let Some(ref allowed) = self.allowed_content_types {
            // Only body-bearing requests declare a content type.
            if let Some(content_type) = headers.get(CONTENT_TYPE) {
                let value = content_type.to_str().unwrap_or("");
                if !allowed.iter().any(|t| value.starts_with(t.as_str())) {
                    return Some((
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        "unsupported content type",
                    ));
                }
            }
        }

        for name in self.required_headers.iter() {
            if !headers.contains_key(name.as_str()) {
                return Some((StatusCode::BAD_REQUEST, "missing required header"));
            }
        }

        None
    }
}

impl<S> Layer<S> for ValidationLayer {
    type Service = ValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService {
            inner,
            config: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ValidationService<S> {
    inner: S,
    config: ValidationLayer,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ValidationService<S>
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
        if let Some((status, reason)) = self.config.check(req.headers()) {
            #[cfg(feature = "tracing")]
            tracing::warn!(status = %status, reason, "request rejected by validation");

            let mut response = Response::new(Full::from(reason));
            *response.status_mut() = status;
            return Box::pin(async move { Ok(response) });
        }

        let inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.oneshot(req).await.map_err(Into::into)?;
            let (parts, body) = response.into_parts();
            let bytes = BodyExt::collect(body).await.map_err(Into::into)?.to_bytes();
            Ok(Response::from_parts(parts, Full::from(bytes)))
        })
    }
}
