//! Bounded response store.
//!
//! The cache layer persists captured responses through the [`CacheBackend`]
//! trait. This module ships [`MemoryStore`], a process-local store with exact
//! least-recently-used eviction, per-entry time-to-live, and cumulative
//! hit/miss statistics. Capacity bounds memory; expired entries are treated
//! as absent and purged lazily by the access that finds them — stale entries
//! are never served.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::GateError;

/// Default store capacity, in entries.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default entry time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Cached response captured by the cache layer.
///
/// Immutable once stored; replaced wholesale on re-store, dropped on
/// eviction, expiry, or invalidation.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    /// Content fingerprint of the uncompressed payload, served as `ETag`.
    pub fingerprint: String,
    /// Whether `body` went through the configured codec.
    pub compressed: bool,
    /// Creation time, kept for diagnostics only; expiry is store-managed.
    pub stored_at: SystemTime,
}

impl CacheEntry {
    pub fn new(
        status: StatusCode,
        headers: Vec<(String, Vec<u8>)>,
        body: Bytes,
        fingerprint: String,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            fingerprint,
            compressed: false,
            stored_at: SystemTime::now(),
        }
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Converts the entry back into an `http::Response`, replaying the
    /// captured status and headers verbatim.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.clear();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}

/// Cumulative store statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

#[async_trait]
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Fetches a cached entry by key.
    ///
    /// Returns `Ok(None)` when the key is absent or the entry has expired.
    /// A successful lookup counts as a touch for eviction ordering.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, GateError>;

    /// Stores an entry, evicting the least-recently-used one at capacity.
    /// `ttl_override` replaces the store's default TTL for this entry.
    async fn set(
        &self,
        key: String,
        entry: CacheEntry,
        ttl_override: Option<Duration>,
    ) -> Result<(), GateError>;

    /// Drops the entry for `key`, if present.
    async fn delete(&self, key: &str) -> Result<(), GateError>;

    /// Drops every entry. Cumulative statistics survive.
    async fn clear(&self) -> Result<(), GateError>;

    /// Current size and lifetime hit/miss counters.
    async fn stats(&self) -> CacheStats;
}

struct StoredEntry {
    entry: CacheEntry,
    expires_at: SystemTime,
}

/// In-memory [`CacheBackend`] with exact LRU eviction.
///
/// Cheap to clone; clones share the same underlying store.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<LruCache<String, StoredEntry>>>,
    default_ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Creates a store holding at most `capacity` entries with the default
    /// 15 minute TTL.
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, DEFAULT_TTL)
    }

    pub fn with_ttl(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            default_ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, GateError> {
        let mut entries = self.entries.lock().await;

        // `LruCache::get` moves the key to most-recently-used; an expired
        // entry is popped on the spot rather than served.
        let expired = match entries.get(key) {
            Some(stored) if SystemTime::now() < stored.expires_at => {
                let entry = stored.entry.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(
        &self,
        key: String,
        entry: CacheEntry,
        ttl_override: Option<Duration>,
    ) -> Result<(), GateError> {
        let ttl = ttl_override.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Ok(());
        }

        let stored = StoredEntry {
            entry,
            expires_at: SystemTime::now() + ttl,
        };

        let mut entries = self.entries.lock().await;
        entries.push(key, stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), GateError> {
        self.entries.lock().await.pop(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), GateError> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let size = self.entries.lock().await.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            size,
            hit_count: hits,
            miss_count: misses,
            hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn entry_with_body(body: &'static [u8]) -> CacheEntry {
        CacheEntry::new(
            StatusCode::OK,
            Vec::new(),
            Bytes::from_static(body),
            crate::fingerprint::fingerprint(body),
        )
    }

    #[tokio::test]
    async fn set_then_get_returns_the_stored_entry() {
        let store = MemoryStore::new(16);
        store
            .set("key".into(), entry_with_body(b"alpha"), None)
            .await
            .expect("set succeeds");

        let entry = store
            .get("key")
            .await
            .expect("get succeeds")
            .expect("entry present");
        assert_eq!(entry.body, Bytes::from_static(b"alpha"));
    }

    #[tokio::test]
    async fn expired_entry_is_absent_and_purged() {
        let store = MemoryStore::new(16);
        store
            .set(
                "key".into(),
                entry_with_body(b"stale"),
                Some(Duration::from_millis(20)),
            )
            .await
            .expect("set succeeds");

        sleep(Duration::from_millis(40)).await;

        assert!(store.get("key").await.expect("get succeeds").is_none());
        // Lazy purge removed the resident entry.
        assert_eq!(store.stats().await.size, 0);
    }

    #[tokio::test]
    async fn insertion_beyond_capacity_evicts_the_lru_entry() {
        let store = MemoryStore::new(3);
        for key in ["a", "b", "c"] {
            store
                .set(key.into(), entry_with_body(b"v"), None)
                .await
                .expect("set succeeds");
        }

        store
            .set("d".into(), entry_with_body(b"v"), None)
            .await
            .expect("set succeeds");

        assert!(store.get("a").await.expect("get succeeds").is_none());
        for key in ["b", "c", "d"] {
            assert!(store.get(key).await.expect("get succeeds").is_some());
        }
    }

    #[tokio::test]
    async fn get_touch_protects_a_key_from_eviction() {
        let store = MemoryStore::new(3);
        for key in ["a", "b", "c"] {
            store
                .set(key.into(), entry_with_body(b"v"), None)
                .await
                .expect("set succeeds");
        }

        // Touch "a" so "b" becomes least recently used.
        assert!(store.get("a").await.expect("get succeeds").is_some());

        store
            .set("d".into(), entry_with_body(b"v"), None)
            .await
            .expect("set succeeds");

        assert!(store.get("a").await.expect("get succeeds").is_some());
        assert!(store.get("b").await.expect("get succeeds").is_none());
    }

    #[tokio::test]
    async fn delete_removes_only_the_named_key() {
        let store = MemoryStore::new(16);
        store
            .set("keep".into(), entry_with_body(b"v"), None)
            .await
            .expect("set succeeds");
        store
            .set("drop".into(), entry_with_body(b"v"), None)
            .await
            .expect("set succeeds");

        store.delete("drop").await.expect("delete succeeds");

        assert!(store.get("drop").await.expect("get succeeds").is_none());
        assert!(store.get("keep").await.expect("get succeeds").is_some());
    }

    #[tokio::test]
    async fn stats_track_cumulative_hits_and_misses() {
        let store = MemoryStore::new(16);
        assert_eq!(store.stats().await.hit_rate, 0.0);

        store
            .set("key".into(), entry_with_body(b"v"), None)
            .await
            .expect("set succeeds");

        store.get("key").await.expect("get succeeds");
        store.get("key").await.expect("get succeeds");
        store.get("missing").await.expect("get succeeds");

        let stats = store.stats().await;
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn clear_drops_entries_but_keeps_counters() {
        let store = MemoryStore::new(16);
        store
            .set("key".into(), entry_with_body(b"v"), None)
            .await
            .expect("set succeeds");
        store.get("key").await.expect("get succeeds");

        store.clear().await.expect("clear succeeds");

        let stats = store.stats().await;
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hit_count, 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_never_stored() {
        let store = MemoryStore::new(16);
        store
            .set(
                "key".into(),
                entry_with_body(b"v"),
                Some(Duration::ZERO),
            )
            .await
            .expect("set succeeds");
        assert!(store.get("key").await.expect("get succeeds").is_none());
    }

    #[test]
    fn stats_serialize_for_diagnostics() {
        let stats = CacheStats {
            size: 3,
            hit_count: 8,
            miss_count: 2,
            hit_rate: 0.8,
        };

        let json = serde_json::to_string(&stats).expect("stats serialize");
        assert!(json.contains("\"hit_count\":8"));
        assert!(json.contains("\"hit_rate\":0.8"));
    }

    #[test]
    fn entry_into_response_replays_status_and_headers() {
        let entry = CacheEntry::new(
            StatusCode::CREATED,
            vec![("content-type".to_owned(), b"application/json".to_vec())],
            Bytes::from_static(b"{}"),
            crate::fingerprint::fingerprint(b"{}"),
        );

        let response = entry.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("content-type").expect("header set"),
            &HeaderValue::from_static("application/json")
        );
    }
}
