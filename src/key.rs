//! Cache key derivation.
//!
//! A cache key identifies a cacheable request shape: method, path, the
//! canonical serialization of the query string, and the values of any
//! configured vary-by headers. Requests that differ only in a header outside
//! the vary-by list intentionally map to the same key.

use std::sync::Arc;

use http::{HeaderMap, Method, Uri};
use sha2::{Digest, Sha256};

/// Literal keys longer than this are replaced by a fixed-length hash so key
/// memory stays bounded regardless of query complexity.
const MAX_LITERAL_KEY_LEN: usize = 200;

/// Hash length in bytes for over-long keys.
const KEY_HASH_BYTES: usize = 16;

type KeyFn = Arc<dyn Fn(&Method, &Uri, &HeaderMap) -> Option<String> + Send + Sync>;

/// Strategy used to turn requests into cache keys.
///
/// The default derives `METHOD:PATH|query|vary-headers`; callers can replace
/// the whole algorithm with [`KeyExtractor::custom`].
#[derive(Clone)]
pub struct KeyExtractor {
    inner: KeyFn,
}

impl KeyExtractor {
    /// Builds the default extractor with the given vary-by header names.
    ///
    /// Vary-by headers are appended in the order given; an absent header
    /// contributes an empty value, so presence and absence derive distinct
    /// keys.
    pub fn vary_by<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vary: Vec<String> = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        Self {
            inner: Arc::new(move |method: &Method, uri: &Uri, headers: &HeaderMap| {
                Some(derive_key(method, uri, headers, &vary))
            }),
        }
    }

    /// Replaces the key algorithm entirely.
    ///
    /// Returning `None` skips caching for the request.
    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&Method, &Uri, &HeaderMap) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(func),
        }
    }

    /// Extracts a cache key from the request parts.
    pub fn extract(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Option<String> {
        (self.inner)(method, uri, headers)
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::vary_by(Vec::<String>::new())
    }
}

fn derive_key(method: &Method, uri: &Uri, headers: &HeaderMap, vary: &[String]) -> String {
    let mut parts = vec![format!("{}:{}", method, uri.path())];

    // Query pairs are sorted so insertion order never changes the key.
    let mut pairs: Vec<&str> = uri
        .query()
        .map(|q| q.split('&').filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    pairs.sort_unstable();
    parts.push(pairs.join("&"));

    for name in vary {
        let value = headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        parts.push(format!("{name}:{value}"));
    }

    let key = parts.join("|");
    if key.len() > MAX_LITERAL_KEY_LEN {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..KEY_HASH_BYTES])
    } else {
        key
    }
}
