//! Effective-permission resolution through role aggregation.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::directory::{PermissionRepository, RoleRepository};
use crate::models::Role;

/// Role names and permission codes granted to a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveAccess {
    /// Role names, highest priority first.
    pub roles: Vec<String>,
    /// Deduplicated `resource:action` codes, sorted.
    pub permissions: Vec<String>,
}

/// Resolves role ids into [`EffectiveAccess`].
///
/// Lookup failures never fail the caller: a failed role lookup yields no
/// access at all and a failed permission lookup keeps the role names but
/// grants no permissions.
#[derive(Clone)]
pub struct AuthorizationResolver {
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
}

impl AuthorizationResolver {
    pub fn new(roles: Arc<dyn RoleRepository>, permissions: Arc<dyn PermissionRepository>) -> Self {
        Self { roles, permissions }
    }

    pub async fn resolve(&self, role_ids: &[Uuid]) -> EffectiveAccess {
        if role_ids.is_empty() {
            return EffectiveAccess::default();
        }

        let mut roles = match self.roles.find_by_ids(role_ids).await {
            Ok(roles) => roles,
            Err(e) => {
                warn!(error = %e, role_count = role_ids.len(), "role lookup failed, granting no access");
                return EffectiveAccess::default();
            }
        };
        roles.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        let role_names = roles.iter().map(|r| r.name.to_string()).collect();

        let permission_ids = union_permission_ids(&roles);
        let permissions = if permission_ids.is_empty() {
            Vec::new()
        } else {
            match self.permissions.find_by_ids(&permission_ids).await {
                Ok(found) => found
                    .iter()
                    .map(|p| p.code())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "permission lookup failed, granting no permissions");
                    Vec::new()
                }
            }
        };

        debug!(
            roles = roles.len(),
            permissions = permissions.len(),
            "effective access resolved"
        );
        EffectiveAccess {
            roles: role_names,
            permissions,
        }
    }

    /// Permission codes granted by `role_ids`.
    pub async fn resolve_effective_permissions(&self, role_ids: &[Uuid]) -> Vec<String> {
        self.resolve(role_ids).await.permissions
    }
}

fn union_permission_ids(roles: &[Role]) -> Vec<Uuid> {
    let ids: HashSet<Uuid> = roles
        .iter()
        .flat_map(|r| r.permission_ids.iter().copied())
        .collect();
    ids.into_iter().collect()
}
