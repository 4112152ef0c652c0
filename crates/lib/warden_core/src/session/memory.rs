//! In-memory [`SessionStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::SessionStore;
use crate::error::{AuthError, Result};
use crate::models::session::RefreshToken;

/// Records by id plus a `token_hash -> id` index, guarded together.
#[derive(Debug, Default)]
struct Tokens {
    by_id: HashMap<Uuid, RefreshToken>,
    by_hash: HashMap<String, Uuid>,
}

impl Tokens {
    fn insert(&mut self, token: &RefreshToken) -> Result<()> {
        if self.by_hash.contains_key(&token.token_hash) {
            return Err(AuthError::Conflict("refresh token already exists".into()));
        }
        self.by_hash.insert(token.token_hash.clone(), token.id);
        self.by_id.insert(token.id, token.clone());
        Ok(())
    }

    fn active_ids(&self, user_id: Uuid, now: DateTime<Utc>) -> Vec<Uuid> {
        newest_first(
            self.by_id
                .values()
                .filter(|t| t.user_id == user_id && t.is_valid_at(now))
                .cloned()
                .collect(),
        )
        .into_iter()
        .map(|t| t.id)
        .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    tokens: RwLock<Tokens>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, revoked ones included.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.by_id.is_empty()
    }
}

fn newest_first(mut tokens: Vec<RefreshToken>) -> Vec<RefreshToken> {
    tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    tokens
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, token: &RefreshToken) -> Result<()> {
        self.tokens.write().await.insert(token)
    }

    async fn create_capped(&self, token: &RefreshToken, max: usize) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        if tokens.by_hash.contains_key(&token.token_hash) {
            return Err(AuthError::Conflict("refresh token already exists".into()));
        }
        let evicted: Vec<Uuid> = tokens
            .active_ids(token.user_id, now)
            .into_iter()
            .skip(max.saturating_sub(1))
            .collect();
        for id in &evicted {
            if let Some(stale) = tokens.by_id.get_mut(id) {
                stale.revoke();
            }
        }
        tokens.insert(token)?;
        Ok(evicted)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<RefreshToken> {
        self.tokens
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or(AuthError::NotFound("session"))
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<RefreshToken> {
        let tokens = self.tokens.read().await;
        tokens
            .by_hash
            .get(token_hash)
            .and_then(|id| tokens.by_id.get(id))
            .cloned()
            .ok_or(AuthError::SessionNotFound)
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let tokens = self.tokens.read().await;
        Ok(newest_first(
            tokens
                .by_id
                .values()
                .filter(|t| t.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find_active_by_user_id(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let now = Utc::now();
        let tokens = self.tokens.read().await;
        Ok(newest_first(
            tokens
                .by_id
                .values()
                .filter(|t| t.user_id == user_id && t.is_valid_at(now))
                .cloned()
                .collect(),
        ))
    }

    async fn update(&self, token: &RefreshToken) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let stored = tokens
            .by_id
            .get_mut(&token.id)
            .ok_or(AuthError::NotFound("session"))?;
        stored.last_used_at = token.last_used_at;
        stored.revoked = token.revoked;
        Ok(())
    }

    async fn revoke(&self, id: Uuid) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let stored = tokens.by_id.get_mut(&id).ok_or(AuthError::NotFound("session"))?;
        stored.revoke();
        Ok(())
    }

    async fn revoke_all_by_user_id(&self, user_id: Uuid) -> Result<u64> {
        let mut tokens = self.tokens.write().await;
        let mut count = 0;
        for token in tokens
            .by_id
            .values_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoke();
            count += 1;
        }
        Ok(count)
    }

    async fn rotate(&self, old_id: Uuid, replacement: &RefreshToken) -> Result<()> {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        if tokens.by_hash.contains_key(&replacement.token_hash) {
            return Err(AuthError::Conflict("refresh token already exists".into()));
        }
        let old = tokens
            .by_id
            .get_mut(&old_id)
            .filter(|t| t.is_valid_at(now))
            .ok_or(AuthError::SessionNotFound)?;
        old.revoke();
        old.mark_used(now);
        tokens.insert(replacement)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        let Tokens { by_id, by_hash } = &mut *tokens;
        let before = by_id.len();
        by_id.retain(|_, t| {
            let keep = !(t.revoked && t.is_expired_at(now));
            if !keep {
                by_hash.remove(&t.token_hash);
            }
            keep
        });
        Ok((before - by_id.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::session::ClientInfo;

    fn token(user_id: Uuid, hash: &str, ttl: Duration) -> RefreshToken {
        RefreshToken::issue(user_id, hash.to_string(), ttl, &ClientInfo::default())
    }

    #[tokio::test]
    async fn missing_hash_is_session_not_found() {
        let store = MemorySessionStore::new();
        assert!(matches!(
            store.find_by_token_hash("nope").await,
            Err(AuthError::SessionNotFound)
        ));
        assert!(matches!(
            store.find_by_id(Uuid::new_v4()).await,
            Err(AuthError::NotFound("session"))
        ));
    }

    #[tokio::test]
    async fn revoke_all_keeps_records() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        for i in 0..3 {
            store.create(&token(user, &format!("h{i}"), Duration::days(1))).await.unwrap();
        }
        store.create(&token(Uuid::new_v4(), "other", Duration::days(1))).await.unwrap();

        assert_eq!(store.revoke_all_by_user_id(user).await.unwrap(), 3);
        assert!(store.find_active_by_user_id(user).await.unwrap().is_empty());

        let all = store.find_by_user_id(user).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|t| t.revoked));
        assert_eq!(store.revoke_all_by_user_id(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn active_sessions_exclude_expired() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        store.create(&token(user, "live", Duration::days(1))).await.unwrap();
        store.create(&token(user, "dead", Duration::seconds(-1))).await.unwrap();

        let active = store.find_active_by_user_id(user).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_hash, "live");
    }

    #[tokio::test]
    async fn sessions_come_back_newest_first() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        let mut older = token(user, "older", Duration::days(1));
        older.created_at -= Duration::minutes(5);
        store.create(&older).await.unwrap();
        store.create(&token(user, "newer", Duration::days(1))).await.unwrap();

        let hashes: Vec<_> = store
            .find_active_by_user_id(user)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.token_hash)
            .collect();
        assert_eq!(hashes, ["newer", "older"]);
    }

    #[tokio::test]
    async fn rotate_swaps_exactly_once() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        let old = token(user, "old", Duration::days(1));
        store.create(&old).await.unwrap();

        let first = token(user, "first", Duration::days(1));
        store.rotate(old.id, &first).await.unwrap();

        let second = token(user, "second", Duration::days(1));
        assert!(matches!(
            store.rotate(old.id, &second).await,
            Err(AuthError::SessionNotFound)
        ));

        let retired = store.find_by_id(old.id).await.unwrap();
        assert!(retired.revoked);
        assert!(retired.last_used_at.is_some());
        assert!(store.find_by_token_hash("first").await.unwrap().is_valid());
        assert!(store.find_by_token_hash("second").await.is_err());
    }

    #[tokio::test]
    async fn rotate_refuses_expired_session() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        let old = token(user, "old", Duration::seconds(-1));
        store.create(&old).await.unwrap();

        let next = token(user, "next", Duration::days(1));
        assert!(store.rotate(old.id, &next).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_expired_only_removes_revoked_and_expired() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        let expired_revoked = token(user, "a", Duration::seconds(-1));
        let expired_live = token(user, "b", Duration::seconds(-1));
        let fresh_revoked = token(user, "c", Duration::days(1));
        for t in [&expired_revoked, &expired_live, &fresh_revoked] {
            store.create(t).await.unwrap();
        }
        store.revoke(expired_revoked.id).await.unwrap();
        store.revoke(fresh_revoked.id).await.unwrap();

        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert!(store.find_by_id(expired_revoked.id).await.is_err());
        assert!(store.find_by_id(expired_live.id).await.is_ok());
        assert!(store.find_by_id(fresh_revoked.id).await.is_ok());
    }

    #[tokio::test]
    async fn capped_create_evicts_oldest_active() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        let mut oldest = token(user, "oldest", Duration::days(1));
        oldest.created_at -= Duration::minutes(10);
        let mut middle = token(user, "middle", Duration::days(1));
        middle.created_at -= Duration::minutes(5);
        store.create(&oldest).await.unwrap();
        store.create(&middle).await.unwrap();

        let newest = token(user, "newest", Duration::days(1));
        let evicted = store.create_capped(&newest, 2).await.unwrap();
        assert_eq!(evicted, [oldest.id]);

        let active: Vec<_> = store
            .find_active_by_user_id(user)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.token_hash)
            .collect();
        assert_eq!(active, ["newest", "middle"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_capped_creates_never_exceed_the_cap() {
        let store = std::sync::Arc::new(MemorySessionStore::new());
        let user = Uuid::new_v4();
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let t = token(user, &format!("h{i}"), Duration::days(1));
                store.create_capped(&t, 3).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.find_active_by_user_id(user).await.unwrap().len(), 3);
        assert_eq!(store.len().await, 20);
    }

    #[tokio::test]
    async fn hash_index_follows_sweeps_and_rejects_duplicates() {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        let dead = token(user, "dup", Duration::seconds(-1));
        store.create(&dead).await.unwrap();
        assert!(matches!(
            store.create(&token(user, "dup", Duration::days(1))).await,
            Err(AuthError::Conflict(_))
        ));

        store.revoke(dead.id).await.unwrap();
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert!(store.find_by_token_hash("dup").await.is_err());

        // The hash is free again once its record is gone.
        store.create(&token(user, "dup", Duration::days(1))).await.unwrap();
        assert!(store.find_by_token_hash("dup").await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn update_persists_last_used() {
        let store = MemorySessionStore::new();
        let mut t = token(Uuid::new_v4(), "h", Duration::days(1));
        store.create(&t).await.unwrap();
        t.mark_used(Utc::now());
        store.update(&t).await.unwrap();
        assert!(store.find_by_id(t.id).await.unwrap().last_used_at.is_some());
    }
}
