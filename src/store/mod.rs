//! Shared window storage.
//!
//! A client's window is a single key holding a sorted set of arrivals,
//! scored by arrival time in milliseconds. The limiter only talks to the
//! store through [`WindowStore`], so any backend with sorted sets and key
//! expiry can hold the shared state.

mod memory;
mod redis;

pub use self::memory::MemoryWindowStore;
pub use self::redis::RedisWindowStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by window store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, protocol or command error reported by Redis.
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// A round trip did not complete in time.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered, but not with something the limiter can use.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for window store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One arrival in a client window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowEntry {
    /// Arrival time, milliseconds since the Unix epoch.
    pub score: i64,
    /// Value distinguishing arrivals that share a millisecond.
    pub member: String,
}

impl WindowEntry {
    pub fn new(score: i64, member: impl Into<String>) -> Self {
        Self {
            score,
            member: member.into(),
        }
    }
}

/// Operations the rate limiter needs from the shared store.
///
/// Each call is expected to be atomic on its own. Calls are not combined
/// into a transaction unless a method says so.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Insert an entry. Adding the same `(score, member)` twice keeps one entry.
    async fn add_entry(&self, key: &str, entry: &WindowEntry) -> StoreResult<()>;

    /// Make the key vanish after `ttl` unless the expiry is set again.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Count entries with `lo <= score <= hi`.
    async fn count_in_range(&self, key: &str, lo: i64, hi: i64) -> StoreResult<u64>;

    /// The `n` lowest-scored entries, ascending by score.
    async fn oldest_entries(&self, key: &str, n: usize) -> StoreResult<Vec<WindowEntry>>;

    /// Remove entries with `score < cutoff`.
    async fn prune_before(&self, key: &str, cutoff: i64) -> StoreResult<()>;

    /// Prune, insert and refresh the expiry of one arrival.
    ///
    /// Backends that can pipeline override this to use a single round trip.
    async fn record(
        &self,
        key: &str,
        entry: &WindowEntry,
        ttl: Duration,
        cutoff: i64,
    ) -> StoreResult<()> {
        self.prune_before(key, cutoff).await?;
        self.add_entry(key, entry).await?;
        self.set_expiry(key, ttl).await
    }

    /// Record an arrival and count `[lo, hi]` as one atomic operation.
    ///
    /// Entries below `lo` are pruned in the same step. No other writer can
    /// interleave between the insert and the count.
    async fn record_and_count(
        &self,
        key: &str,
        entry: &WindowEntry,
        ttl: Duration,
        lo: i64,
        hi: i64,
    ) -> StoreResult<u64>;

    /// Check that the store is reachable.
    async fn ping(&self) -> StoreResult<()>;
}
