//! In-process [`ExpiringStore`] backed by a `DashMap`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{ExpiringStore, MAX_TTL};
use crate::error::{AuthError, Result};

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_TTL)
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Expiring map. Reads ignore expired entries; [`MemoryStore::cleanup`]
/// reclaims their memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "expired kv entries evicted");
        }
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                store.cleanup();
            }
        })
    }

    fn live_entry<T>(&self, key: &str, f: impl FnOnce(&Entry, Instant) -> T) -> Option<T> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .and_then(|e| e.is_live(now).then(|| f(&e, now)));
        if found.is_none() {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        found
    }
}

#[async_trait]
impl ExpiringStore for MemoryStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: now,
        });
        let current = if entry.is_live(now) {
            entry
                .value
                .parse::<i64>()
                .map_err(|_| AuthError::Internal(format!("kv value at {key} is not a counter")))?
        } else {
            0
        };
        let next = current + 1;
        entry.value = next.to_string();
        entry.expires_at = deadline(now, ttl);
        Ok(next)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: deadline(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_entry(key, |_, _| ()).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.live_entry(key, |e, now| e.expires_at.duration_since(now)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
