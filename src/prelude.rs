//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use campus_gate::prelude::*;
//! # use std::time::Duration;
//! # let backend = MemoryStore::new(128);
//! let layer = CacheLayer::builder(backend)
//!     .ttl(Duration::from_secs(300))
//!     .build();
//! ```

#[cfg(feature = "compression")]
pub use crate::codec::GzipCodec;
pub use crate::codec::{Codec, IdentityCodec};
pub use crate::error::GateError;
pub use crate::events::{InvalidateLayer, InvalidationRegistry, Invalidator};
pub use crate::identity::ClientIdentity;
pub use crate::key::KeyExtractor;
pub use crate::layer::{CacheLayer, CacheLayerBuilder, CacheService, HEADER_X_CACHE};
pub use crate::policy::{CachePolicy, FreshnessTier, RolePolicy};
pub use crate::rate_limit::{RateLimitDecision, RateLimitStore, DEFAULT_SWEEP_INTERVAL};
pub use crate::store::{CacheBackend, CacheEntry, CacheStats, MemoryStore};
pub use crate::throttle::{
    LimiterClass, RateLimitLayer, HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING,
    HEADER_RATELIMIT_RESET,
};
pub use crate::validation::ValidationLayer;
