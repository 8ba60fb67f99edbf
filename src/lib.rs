//! Campus Gate
//! ===========
//!
//! `campus-gate` provides request-level caching and rate limiting middleware
//! for Tower-based services: cached responses are served without re-running
//! the handler, conditional requests revalidate against content fingerprints,
//! named application events drop the entries they touch, and fixed-window
//! counters throttle noisy clients.
//!
//! The crate exposes a [`CacheLayer`] configured through a builder, plus a
//! [`throttle::RateLimitLayer`] and an [`events::InvalidateLayer`] for
//! mutation routes. Most consumers start from [`CacheLayer::builder`] with an
//! in-memory store:
//!
//! ```no_run
//! use std::time::Duration;
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use campus_gate::prelude::*;
//!
//! # async fn run() -> Result<(), campus_gate::layer::BoxError> {
//! let layer = CacheLayer::builder(MemoryStore::new(1_000))
//!     .ttl(Duration::from_secs(300))
//!     .vary_by(["x-institution-id"])
//!     .invalidate_on(["enrollment:updated"])
//!     .build();
//!
//! let mut svc = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(tower::service_fn(|_req| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::from("ok")))
//!     }));
//!
//! let response = svc
//!     .ready()
//!     .await?
//!     .call(http::Request::new(()))
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```
//!
//! Handlers and their responses are never altered on a miss; the middleware
//! only adds `X-Cache`, `ETag`, and rate limit metadata headers, and fails
//! open whenever its own machinery errors.

pub mod codec;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod identity;
pub mod key;
pub mod layer;
pub mod policy;
pub mod prelude;
pub mod rate_limit;
pub mod store;
pub mod throttle;
pub mod validation;

pub use error::GateError;
pub use identity::ClientIdentity;
pub use key::KeyExtractor;
pub use layer::{CacheLayer, CacheLayerBuilder, HEADER_X_CACHE};
pub use policy::{CachePolicy, FreshnessTier, RolePolicy};
pub use store::{CacheBackend, CacheEntry, CacheStats, MemoryStore};
