//! Fast expiring key-value store used by the lockout guard and the
//! access-token revocation list.
//!
//! Entries expire passively; nothing here needs a sweeper for correctness.
//! Losing the store is safe: lockout counters reset and revoked access
//! tokens live until their natural expiry.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Longest expiry a store honours; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(86_400 * 365 * 30);

#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Atomically increment the counter at `key` and (re)set its expiry to
    /// `ttl`. A missing or expired key counts from zero. Returns the new
    /// value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining lifetime of `key`, `None` when absent or expired.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn delete(&self, key: &str) -> Result<()>;
}
