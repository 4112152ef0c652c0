//! User, role and permission lookups consumed by the auth flows.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Email, Permission, Role, User};

pub use memory::MemoryDirectory;
pub use pg::PgDirectory;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<User>;

    async fn find_by_email(&self, email: &Email) -> Result<User>;

    /// Insert a user together with its role assignments. A taken email fails
    /// with `Conflict`.
    async fn create(&self, user: &User) -> Result<()>;

    /// Persist status, password hash and role assignments.
    async fn update(&self, user: &User) -> Result<()>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Role>;

    /// Roles among `ids` that exist. Unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>>;

    /// Roles flagged `is_default`.
    async fn find_defaults(&self) -> Result<Vec<Role>>;

    async fn create(&self, role: &Role) -> Result<()>;

    async fn update(&self, role: &Role) -> Result<()>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Permissions among `ids` that exist. Unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Permission>>;

    async fn create(&self, permission: &Permission) -> Result<()>;

    /// Whether any role grants the permission.
    async fn is_in_use(&self, id: Uuid) -> Result<bool>;
}
