//! Shared key-value store abstraction.
//!
//! Cross-process state (cached principals, sliding-window quota logs) lives
//! behind the [`KvStore`] trait so gateway logic never branches on which
//! backing store is active. Two implementations are selected at
//! construction:
//!
//! - [`MemoryStore`] - per-process map, used standalone and as the default
//!   when no store URL is configured.
//! - [`RedisStore`] - networked store shared across horizontally-scaled
//!   instances.
//!
//! Every mutation is a single atomic primitive against the backing store
//! (set-with-TTL; prune+insert+count on a sorted structure), so correctness
//! relies on the store's own atomicity rather than an external lock. Both
//! keyspaces may be flushed at any time without corrupting correctness -
//! the gateway degrades to revalidate/recount everything.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the operation timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store answered with something we could not interpret.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// Abstract key-value capability over the shared store.
///
/// Plain keys hold TTL-bound string values; window keys hold an ordered set
/// of scored members used as a sliding-window request log.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value for `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`. Overwrites any
    /// existing value and its TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically prune window members scored at or before
    /// `now_ms - window`, insert `member` scored at `now_ms`, refresh the
    /// key's expiry to the window length, and return the member count
    /// including the new insertion.
    async fn window_record(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64, StoreError>;

    /// Remove a single member from a window (rollback after a rejected
    /// record).
    async fn window_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Atomically prune window members scored at or before
    /// `now_ms - window` and return the remaining count, without inserting.
    async fn window_count(&self, key: &str, now_ms: u64, window: Duration)
    -> Result<u64, StoreError>;

    /// Liveness probe against the backing store.
    async fn ping(&self) -> Result<(), StoreError>;
}
