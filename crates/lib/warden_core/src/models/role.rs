//! The role aggregate.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::events::DomainEvent;
use crate::uuid::uuidv7;

/// Maximum role name length.
const MAX_ROLE_NAME_LEN: usize = 50;

/// A role name: lowercase ASCII letters, digits and underscores, starting
/// with a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleName(String);

impl RoleName {
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("role name is required".into()));
        }
        if name.len() > MAX_ROLE_NAME_LEN {
            return Err(AuthError::Validation(format!(
                "role name must be at most {MAX_ROLE_NAME_LEN} characters"
            )));
        }
        let mut chars = name.chars();
        let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let rest_valid = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !(starts_with_letter && rest_valid) {
            return Err(AuthError::Validation(format!(
                "role name must match ^[a-z][a-z0-9_]*$: {name}"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named bundle of permissions.
///
/// System roles are immutable and non-deletable; default roles are assigned
/// to every new user and are non-deletable.
#[derive(Debug, Clone)]
pub struct Role {
    pub id: Uuid,
    pub name: RoleName,
    pub description: Option<String>,
    pub permission_ids: Vec<Uuid>,
    pub is_system: bool,
    pub is_default: bool,
    /// Display ordering, highest first.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) events: Vec<DomainEvent>,
}

impl Role {
    pub fn new(name: RoleName, description: Option<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: uuidv7(),
            name,
            description,
            permission_ids: Vec::new(),
            is_system: false,
            is_default: false,
            priority,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        }
    }

    /// A built-in role seeded with its permissions.
    pub fn system(name: RoleName, description: Option<String>, permission_ids: &[Uuid]) -> Self {
        let mut role = Self::new(name, description, i32::MAX);
        role.permission_ids = dedup(permission_ids.iter().copied());
        role.is_system = true;
        role
    }

    pub fn update_details(
        &mut self,
        name: RoleName,
        description: Option<String>,
        priority: i32,
    ) -> Result<()> {
        self.ensure_mutable()?;
        self.name = name;
        self.description = description;
        self.priority = priority;
        self.touch();
        self.events.push(DomainEvent::RoleUpdated { role_id: self.id });
        Ok(())
    }

    /// Grant a permission. Granting one the role already carries is an error.
    pub fn grant_permission(&mut self, permission_id: Uuid) -> Result<()> {
        self.ensure_mutable()?;
        if self.permission_ids.contains(&permission_id) {
            return Err(AuthError::BusinessRule(format!(
                "permission {permission_id} is already granted to role {}",
                self.name
            )));
        }
        self.permission_ids.push(permission_id);
        self.touch();
        self.events.push(DomainEvent::RolePermissionGranted {
            role_id: self.id,
            permission_id,
        });
        Ok(())
    }

    pub fn revoke_permission(&mut self, permission_id: Uuid) -> Result<()> {
        self.ensure_mutable()?;
        let before = self.permission_ids.len();
        self.permission_ids.retain(|id| *id != permission_id);
        if self.permission_ids.len() == before {
            return Err(AuthError::BusinessRule(format!(
                "permission {permission_id} is not granted to role {}",
                self.name
            )));
        }
        self.touch();
        self.events.push(DomainEvent::RolePermissionRevoked {
            role_id: self.id,
            permission_id,
        });
        Ok(())
    }

    /// Replace the whole permission set; duplicates in the input collapse.
    pub fn replace_permissions(&mut self, permission_ids: impl IntoIterator<Item = Uuid>) -> Result<()> {
        self.ensure_mutable()?;
        self.permission_ids = dedup(permission_ids);
        self.touch();
        self.events.push(DomainEvent::RoleUpdated { role_id: self.id });
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        if self.is_system {
            return Err(AuthError::BusinessRule(format!(
                "system role {} cannot be deleted",
                self.name
            )));
        }
        if self.is_default {
            return Err(AuthError::BusinessRule(format!(
                "default role {} cannot be deleted",
                self.name
            )));
        }
        Ok(())
    }

    /// Mark the role for deletion, recording a `RoleDeleted` event.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_deletable()?;
        self.events.push(DomainEvent::RoleDeleted { role_id: self.id });
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_system {
            return Err(AuthError::BusinessRule(format!(
                "system role {} cannot be modified",
                self.name
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn dedup(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
