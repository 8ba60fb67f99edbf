//! Content fingerprints for conditional revalidation.
//!
//! A fingerprint is a truncated SHA-256 digest of the response payload. It is
//! stored alongside the cached entry, emitted as the `ETag` header, and
//! compared against `If-None-Match` on later requests: equal fingerprints
//! short-circuit to `304 Not Modified` without a body.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept; 128 bits is plenty for payload identity.
const FINGERPRINT_BYTES: usize = 16;

/// Computes the fingerprint of a response payload.
///
/// Deterministic over the bytes: identical payloads always produce the same
/// fingerprint, and any byte difference changes it with overwhelming
/// probability.
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Formats a fingerprint as an `ETag` header value.
pub fn etag_value(fp: &str) -> String {
    format!("\"{fp}\"")
}

/// Checks an `If-None-Match` header value against a stored fingerprint.
///
/// Accepts comma-separated lists, quoted and unquoted forms, `W/` weak
/// prefixes, and the `*` wildcard.
pub fn matches(if_none_match: &str, fp: &str) -> bool {
    if_none_match.split(',').any(|candidate| {
        let candidate = candidate
            .trim()
            .trim_start_matches("W/")
            .trim_matches('"');
        candidate == "*" || candidate == fp
    })
}
