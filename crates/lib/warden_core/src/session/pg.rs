//! Postgres-backed [`SessionStore`].

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::SessionStore;
use crate::error::{AuthError, Result};
use crate::models::session::RefreshToken;

const COLUMNS: &str = "id, user_id, token_hash, expires_at, created_at, last_used_at, \
                       revoked, device_info, ip_address";

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert<'e, E>(executor: E, token: &RefreshToken) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens
            (id, user_id, token_hash, expires_at, created_at, last_used_at,
             revoked, device_info, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(token.id)
    .bind(token.user_id)
    .bind(&token.token_hash)
    .bind(token.expires_at)
    .bind(token.created_at)
    .bind(token.last_used_at)
    .bind(token.revoked)
    .bind(&token.device_info)
    .bind(&token.ip_address)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, token: &RefreshToken) -> Result<()> {
        insert(&self.pool, token).await
    }

    async fn create_capped(&self, token: &RefreshToken, max: usize) -> Result<Vec<Uuid>> {
        let keep = i64::try_from(max.saturating_sub(1)).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;

        // Row lock on the owner serializes concurrent logins of one user.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(token.user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let evicted: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens SET revoked = TRUE
            WHERE id IN (
                SELECT id FROM refresh_tokens
                WHERE user_id = $1 AND revoked = FALSE AND expires_at > now()
                ORDER BY created_at DESC, id DESC
                OFFSET $2
            )
            RETURNING id
            "#,
        )
        .bind(token.user_id)
        .bind(keep)
        .fetch_all(&mut *tx)
        .await?;

        insert(&mut *tx, token).await?;
        tx.commit().await?;
        Ok(evicted.into_iter().map(|(id,)| id).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<RefreshToken> {
        sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {COLUMNS} FROM refresh_tokens WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::NotFound("session"))
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<RefreshToken> {
        sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::SessionNotFound)
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let rows = sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {COLUMNS} FROM refresh_tokens WHERE user_id = $1 \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_active_by_user_id(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let rows = sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {COLUMNS} FROM refresh_tokens \
             WHERE user_id = $1 AND revoked = FALSE AND expires_at > now() \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update(&self, token: &RefreshToken) -> Result<()> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET last_used_at = $2, revoked = $3 WHERE id = $1",
        )
        .bind(token.id)
        .bind(token.last_used_at)
        .bind(token.revoked)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("session"));
        }
        Ok(())
    }

    async fn revoke(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("session"));
        }
        Ok(())
    }

    async fn revoke_all_by_user_id(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rotate(&self, old_id: Uuid, replacement: &RefreshToken) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-swap: only a still-valid record may be retired.
        let retired = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, last_used_at = now()
            WHERE id = $1 AND revoked = FALSE AND expires_at > now()
            "#,
        )
        .bind(old_id)
        .execute(&mut *tx)
        .await?;
        if retired.rows_affected() == 0 {
            debug!(session_id = %old_id, "rotation lost race, session no longer valid");
            return Err(AuthError::SessionNotFound);
        }

        insert(&mut *tx, replacement).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE revoked = TRUE AND expires_at <= now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
