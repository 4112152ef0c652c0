//! Failed-attempt counting and temporary lockout per identifier.
//!
//! Identifiers are opaque strings: the normalized email for account lockout,
//! `ip:<addr>` for per-address lockout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::Result;
use crate::kv::ExpiringStore;

const ATTEMPTS_PREFIX: &str = "lockout:attempts:";
const LOCKED_PREFIX: &str = "lockout:locked:";

/// Thresholds for [`LockoutGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger a lock.
    pub threshold: u32,
    /// How long a lock lasts.
    pub duration: Duration,
    /// Sliding window over which failures are counted.
    pub window: Duration,
}

impl LockoutPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            threshold: config.lockout_threshold,
            duration: config.lockout_duration,
            window: config.lockout_window,
        }
    }
}

/// Tracks failed attempts in an [`ExpiringStore`] and locks identifiers that
/// reach the threshold.
#[derive(Clone)]
pub struct LockoutGuard {
    store: Arc<dyn ExpiringStore>,
    policy: LockoutPolicy,
}

impl LockoutGuard {
    pub fn new(store: Arc<dyn ExpiringStore>, policy: LockoutPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Whether `identifier` is locked, and for how much longer.
    pub async fn is_locked(&self, identifier: &str) -> Result<(bool, Duration)> {
        let remaining = self.store.ttl(&locked_key(identifier)).await?;
        Ok(match remaining {
            Some(left) => (true, left),
            None => (false, Duration::ZERO),
        })
    }

    /// Count one failure. Reaching the threshold locks the identifier for the
    /// policy duration and clears the counter. Returns the count after this
    /// failure.
    pub async fn record_failed_attempt(&self, identifier: &str) -> Result<u32> {
        let count = self
            .store
            .incr_with_ttl(&attempts_key(identifier), self.policy.window)
            .await?;
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        debug!(identifier, count, "failed attempt recorded");

        if count >= self.policy.threshold {
            self.store
                .set_with_ttl(&locked_key(identifier), "1", self.policy.duration)
                .await?;
            self.store.delete(&attempts_key(identifier)).await?;
            warn!(
                identifier,
                attempts = count,
                lock_secs = self.policy.duration.as_secs(),
                "identifier locked after repeated failures"
            );
        }
        Ok(count)
    }

    /// Clear the failure counter. Called after a successful login.
    pub async fn reset_attempts(&self, identifier: &str) -> Result<()> {
        self.store.delete(&attempts_key(identifier)).await
    }

    /// Lift a lock and clear the counter.
    pub async fn unlock(&self, identifier: &str) -> Result<()> {
        self.store.delete(&locked_key(identifier)).await?;
        self.store.delete(&attempts_key(identifier)).await
    }
}

fn attempts_key(identifier: &str) -> String {
    format!("{ATTEMPTS_PREFIX}{identifier}")
}

fn locked_key(identifier: &str) -> String {
    format!("{LOCKED_PREFIX}{identifier}")
}
