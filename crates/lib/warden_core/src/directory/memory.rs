//! In-memory directory for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PermissionRepository, RoleRepository, UserRepository};
use crate::error::{AuthError, Result};
use crate::models::{Email, Permission, Role, User};

/// Implements every directory repository with the same uniqueness rules as
/// the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<Uuid, User>>,
    roles: RwLock<HashMap<Uuid, Role>>,
    permissions: RwLock<HashMap<Uuid, Permission>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Stored copies never carry undrained events.
fn stored<T: Clone>(value: &T, strip: impl FnOnce(&mut T)) -> T {
    let mut copy = value.clone();
    strip(&mut copy);
    copy
}

#[async_trait]
impl UserRepository for MemoryDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AuthError::NotFound("user"))
    }

    async fn find_by_email(&self, email: &Email) -> Result<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| &u.email == email)
            .cloned()
            .ok_or(AuthError::NotFound("user"))
    }

    async fn create(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(AuthError::Conflict("email already registered".into()));
        }
        users.insert(user.id, stored(user, |u| u.events.clear()));
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(AuthError::Conflict("email already registered".into()));
        }
        let slot = users.get_mut(&user.id).ok_or(AuthError::NotFound("user"))?;
        *slot = stored(user, |u| u.events.clear());
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for MemoryDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Role> {
        self.roles
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AuthError::NotFound("role"))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>> {
        let roles = self.roles.read().await;
        Ok(ids.iter().filter_map(|id| roles.get(id).cloned()).collect())
    }

    async fn find_defaults(&self) -> Result<Vec<Role>> {
        let roles = self.roles.read().await;
        let mut defaults: Vec<Role> = roles.values().filter(|r| r.is_default).cloned().collect();
        defaults.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(defaults)
    }

    async fn create(&self, role: &Role) -> Result<()> {
        let mut roles = self.roles.write().await;
        if roles.values().any(|r| r.name == role.name) {
            return Err(AuthError::Conflict("role name already exists".into()));
        }
        roles.insert(role.id, stored(role, |r| r.events.clear()));
        Ok(())
    }

    async fn update(&self, role: &Role) -> Result<()> {
        let mut roles = self.roles.write().await;
        if roles.values().any(|r| r.id != role.id && r.name == role.name) {
            return Err(AuthError::Conflict("role name already exists".into()));
        }
        let slot = roles.get_mut(&role.id).ok_or(AuthError::NotFound("role"))?;
        *slot = stored(role, |r| r.events.clear());
        Ok(())
    }
}

#[async_trait]
impl PermissionRepository for MemoryDirectory {
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Permission>> {
        let permissions = self.permissions.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| permissions.get(id).cloned())
            .collect())
    }

    async fn create(&self, permission: &Permission) -> Result<()> {
        let mut permissions = self.permissions.write().await;
        if permissions
            .values()
            .any(|p| p.resource == permission.resource && p.action == permission.action)
        {
            return Err(AuthError::Conflict("permission code already exists".into()));
        }
        permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn is_in_use(&self, id: Uuid) -> Result<bool> {
        let roles = self.roles.read().await;
        Ok(roles.values().any(|r| r.permission_ids.contains(&id)))
    }
}
