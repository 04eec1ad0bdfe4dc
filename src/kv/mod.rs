//! Shared key-value store for cross-process coordination
//!
//! The crawl lock and the request rate limiter both live here. The trait only
//! exposes atomic primitives; coordination keys have no plain `get`/`set`.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a key-value backend
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Key-value store lock poisoned")]
    LockPoisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for key-value operations
pub type KvResult<T> = Result<T, KvError>;

/// State of a fixed-window counter after one increment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Whether this call was counted
    pub admitted: bool,
    /// Count in the current window after this call
    pub count: u64,
    /// Window end, epoch milliseconds
    pub window_ends_at_ms: i64,
}

/// Atomic coordination primitives
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Takes the lease on `key` for `owner` if it is free or expired
    ///
    /// Returns `true` when `owner` now holds the lease.
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> KvResult<bool>;

    /// Drops the lease on `key` if `owner` still holds it
    ///
    /// Returns `false` when the lease had expired or belongs to someone else.
    async fn release_lease(&self, key: &str, owner: &str) -> KvResult<bool>;

    /// Counts one hit against `key` unless the window is already at `limit`
    ///
    /// A fresh window of length `window` starts on the first hit after the
    /// previous one ends. Rejected hits leave the count untouched.
    async fn increment_within_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> KvResult<WindowCount>;
}

/// Current wall-clock time in epoch milliseconds
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
