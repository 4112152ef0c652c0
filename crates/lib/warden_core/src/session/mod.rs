//! Refresh-token (session) persistence.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::session::RefreshToken;

pub use memory::MemorySessionStore;
pub use pg::PgSessionStore;

/// Durable store of [`RefreshToken`] records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, token: &RefreshToken) -> Result<()>;

    /// Insert `token` and revoke the owner's oldest active sessions so that at
    /// most `max` remain active, the new one included. Eviction and insert
    /// are one atomic step per user. Returns the evicted ids.
    async fn create_capped(&self, token: &RefreshToken, max: usize) -> Result<Vec<Uuid>>;

    /// Fails with `NotFound` when absent.
    async fn find_by_id(&self, id: Uuid) -> Result<RefreshToken>;

    /// Fails with `SessionNotFound` when no record carries `token_hash`.
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<RefreshToken>;

    /// Every session of the user, revoked and expired included, newest first.
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<RefreshToken>>;

    /// Unrevoked, unexpired sessions of the user, newest first.
    async fn find_active_by_user_id(&self, user_id: Uuid) -> Result<Vec<RefreshToken>>;

    /// Persist `last_used_at` and `revoked`.
    async fn update(&self, token: &RefreshToken) -> Result<()>;

    /// Mark one session revoked. Revoking a revoked session is a no-op.
    async fn revoke(&self, id: Uuid) -> Result<()>;

    /// Revoke every live session of the user. Returns how many changed.
    async fn revoke_all_by_user_id(&self, user_id: Uuid) -> Result<u64>;

    /// Atomically revoke `old_id` and insert `replacement`.
    ///
    /// The revoke only succeeds while the old record is still valid; if it was
    /// revoked or expired in the meantime nothing is written and the call
    /// fails with `SessionNotFound`.
    async fn rotate(&self, old_id: Uuid, replacement: &RefreshToken) -> Result<()>;

    /// Hard-delete records that are both expired and revoked.
    async fn delete_expired(&self) -> Result<u64>;
}
