//! Fixed-window rate limiting state.
//!
//! [`RateLimitStore`] keeps one counter per limiting identity. A counter
//! lives for one window; the first request after the window closes replaces
//! it lazily, and a periodic sweep deletes counters whose window has already
//! closed so memory stays bounded independent of request volume.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::GateError;

/// How often the background sweep runs by default.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_in: Duration,
    /// Whole seconds to wait before retrying; present only on rejection.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug)]
struct RateLimitRecord {
    count: u32,
    reset_at: Instant,
}

/// Shared fixed-window counter table.
///
/// Cheap to clone; clones share the same counters and sweep task. Per-key
/// checks are linearizable: the map's entry lock serializes concurrent
/// increments for the same identity.
#[derive(Clone)]
pub struct RateLimitStore {
    records: Arc<DashMap<String, RateLimitRecord>>,
    shutdown_tx: Arc<RwLock<Option<tokio::sync::oneshot::Sender<()>>>>,
    sweep_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            shutdown_tx: Arc::new(RwLock::new(None)),
            sweep_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Checks and counts one request for `key` under `limit` per `window`.
    ///
    /// A missing or expired record starts a fresh window at `count = 1`.
    /// Within the window, requests increment until `limit` is reached;
    /// rejected requests do not increment and never extend the window.
    pub fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let now = Instant::now();
        let mut record = self
            .records
            .entry(key.to_owned())
            .or_insert_with(|| RateLimitRecord {
                count: 0,
                reset_at: now + window,
            });

        if now >= record.reset_at {
            // Lazy replacement: the first request past the boundary opens
            // the next window.
            record.count = 0;
            record.reset_at = now + window;
        }

        if record.count < limit {
            record.count += 1;
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - record.count,
                reset_in: record.reset_at - now,
                retry_after_secs: None,
            }
        } else {
            let reset_in = record.reset_at - now;
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_in,
                retry_after_secs: Some(reset_in.as_secs_f64().ceil() as u64),
            }
        }
    }

    /// Deletes every record whose window has already closed.
    ///
    /// Single pass over the table; returns the number of records removed.
    pub fn sweep(&self) -> usize {
        sweep_records(&self.records)
    }

    /// Number of live records, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Starts the periodic sweep task. Calling while a sweep is already
    /// running is a no-op.
    pub async fn start_sweep(&self, interval: Duration) -> Result<(), GateError> {
        if interval.is_zero() {
            return Err(GateError::Config(
                "sweep interval must be greater than zero".to_owned(),
            ));
        }

        let mut handle_guard = self.sweep_handle.write().await;
        if handle_guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        *self.shutdown_tx.write().await = Some(tx);

        let records = self.records.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _removed = sweep_records(&records);
                        #[cfg(feature = "tracing")]
                        if _removed > 0 {
                            tracing::debug!(removed = _removed, "rate limit sweep");
                        }
                    }
                    _ = &mut rx => break,
                }
            }
        });

        *handle_guard = Some(handle);

        #[cfg(feature = "tracing")]
        tracing::debug!(interval_secs = interval.as_secs(), "rate limit sweep started");

        Ok(())
    }

    /// Stops the sweep task and waits for it to finish. Safe to call when no
    /// sweep is running, and safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.sweep_handle.write().await.take() {
            let _ = handle.await;
        }
    }
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sweep_records(records: &DashMap<String, RateLimitRecord>) -> usize {
    let now = Instant::now();
    let before = records.len();
    records.retain(|_, record| now < record.reset_at);
    before.saturating_sub(records.len())
}
