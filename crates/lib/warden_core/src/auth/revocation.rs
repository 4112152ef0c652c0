//! Denylist of access tokens revoked before their natural expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::kv::ExpiringStore;

const KEY_PREFIX: &str = "revoked:access:";

/// Entries live exactly as long as the token they revoke.
#[derive(Clone)]
pub struct RevocationList {
    store: Arc<dyn ExpiringStore>,
}

impl RevocationList {
    pub fn new(store: Arc<dyn ExpiringStore>) -> Self {
        Self { store }
    }

    /// Denylist token `jti` until `expires_at` (unix seconds). A token that
    /// has already expired is skipped. Returns whether an entry was written.
    pub async fn add(&self, jti: &str, expires_at: i64) -> Result<bool> {
        let remaining = expires_at.saturating_sub(Utc::now().timestamp());
        if remaining <= 0 {
            debug!(jti, "token already expired, not denylisting");
            return Ok(false);
        }
        let ttl = Duration::from_secs(remaining as u64);
        self.store.set_with_ttl(&key(jti), "1", ttl).await?;
        Ok(true)
    }

    pub async fn is_blacklisted(&self, jti: &str) -> Result<bool> {
        self.store.exists(&key(jti)).await
    }
}

fn key(jti: &str) -> String {
    format!("{KEY_PREFIX}{jti}")
}
