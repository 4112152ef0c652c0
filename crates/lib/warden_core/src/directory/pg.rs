//! Postgres-backed directory.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PermissionRepository, RoleRepository, UserRepository};
use crate::error::{AuthError, Result};
use crate::models::{Email, Permission, Role, RoleName, User, UserStatus};

/// Implements every directory repository over one pool.
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn role_ids_of(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT role_id FROM user_roles WHERE user_id = $1 ORDER BY assigned_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn load_roles(&self, rows: Vec<RoleRow>) -> Result<Vec<Role>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let pairs = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT role_id, permission_id FROM role_permissions WHERE role_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grants: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (role_id, permission_id) in pairs {
            grants.entry(role_id).or_default().push(permission_id);
        }
        rows.into_iter()
            .map(|row| {
                let permission_ids = grants.remove(&row.id).unwrap_or_default();
                row.into_role(permission_ids)
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, role_ids: Vec<Uuid>) -> Result<User> {
        Ok(User {
            id: self.id,
            email: Email::parse(&self.email)
                .map_err(|e| AuthError::Internal(format!("stored email is invalid: {e}")))?,
            password_hash: self.password_hash,
            status: self
                .status
                .parse::<UserStatus>()
                .map_err(|e| AuthError::Internal(format!("stored status is invalid: {e}")))?,
            role_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    is_system: bool,
    is_default: bool,
    priority: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn into_role(self, permission_ids: Vec<Uuid>) -> Result<Role> {
        Ok(Role {
            id: self.id,
            name: RoleName::parse(&self.name)
                .map_err(|e| AuthError::Internal(format!("stored role name is invalid: {e}")))?,
            description: self.description,
            permission_ids,
            is_system: self.is_system,
            is_default: self.is_default,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: Vec::new(),
        })
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, status, created_at, updated_at";
const ROLE_COLUMNS: &str =
    "id, name, description, is_system, is_default, priority, created_at, updated_at";

async fn replace_user_roles(
    tx: &mut sqlx::PgConnection,
    user_id: Uuid,
    role_ids: &[Uuid],
) -> Result<()> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    for role_id in role_ids {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
    }
    Ok(())
}

async fn replace_role_permissions(
    tx: &mut sqlx::PgConnection,
    role_id: Uuid,
    permission_ids: &[Uuid],
) -> Result<()> {
    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
    for permission_id in permission_ids {
        sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)")
            .bind(role_id)
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl UserRepository for PgDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::NotFound("user"))?;
        let role_ids = self.role_ids_of(row.id).await?;
        row.into_user(role_ids)
    }

    async fn find_by_email(&self, email: &Email) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::NotFound("user"))?;
        let role_ids = self.role_ids_of(row.id).await?;
        row.into_user(role_ids)
    }

    async fn create(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(user.email.as_str())
        .bind(&user.password_hash)
        .bind(user.status.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;
        replace_user_roles(&mut *tx, user.id, &user.role_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, status = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(user.email.as_str())
        .bind(&user.password_hash)
        .bind(user.status.as_str())
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("user"));
        }
        replace_user_roles(&mut *tx, user.id, &user.role_ids).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for PgDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Role> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::NotFound("role"))?;
        let mut roles = self.load_roles(vec![row]).await?;
        roles.pop().ok_or(AuthError::NotFound("role"))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        self.load_roles(rows).await
    }

    async fn find_defaults(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE is_default = TRUE \
             ORDER BY priority DESC, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.load_roles(rows).await
    }

    async fn create(&self, role: &Role) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO roles
                (id, name, description, is_system, is_default, priority, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(role.id)
        .bind(role.name.as_str())
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.is_default)
        .bind(role.priority)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await?;
        replace_role_permissions(&mut *tx, role.id, &role.permission_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, role: &Role) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, description = $3, is_default = $4, priority = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(role.id)
        .bind(role.name.as_str())
        .bind(&role.description)
        .bind(role.is_default)
        .bind(role.priority)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("role"));
        }
        replace_role_permissions(&mut *tx, role.id, &role.permission_ids).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PermissionRepository for PgDirectory {
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Permission>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, Permission>(
            r#"
            SELECT id, resource, action, description, is_system, created_at, updated_at
            FROM permissions
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create(&self, permission: &Permission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO permissions
                (id, resource, action, description, is_system, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(permission.id)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .bind(permission.is_system)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_in_use(&self, id: Uuid) -> Result<bool> {
        let in_use = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM role_permissions WHERE permission_id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(in_use)
    }
}
