use thiserror::Error;

/// Errors that can occur inside the caching and rate limiting layers.
///
/// These never reach clients: every middleware in this crate fails open,
/// logging the error and forwarding the request to the wrapped handler.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("store error: {0}")]
    Store(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
