//! The user (principal) aggregate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::values::Email;
use crate::error::{AuthError, Result};
use crate::events::DomainEvent;
use crate::uuid::uuidv7;

/// Lifecycle status of a user.
///
/// Allowed transitions: pending → active | banned, active → inactive | banned,
/// inactive → active | banned. Banned is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Active,
    Inactive,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Banned => "banned",
        }
    }

    pub fn can_transition_to(self, next: UserStatus) -> bool {
        use UserStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Banned)
                | (Active, Inactive)
                | (Active, Banned)
                | (Inactive, Active)
                | (Inactive, Banned)
        )
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "banned" => Ok(UserStatus::Banned),
            other => Err(AuthError::Validation(format!("unknown user status: {other}"))),
        }
    }
}

/// Domain user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Email,
    pub password_hash: String,
    pub status: UserStatus,
    pub role_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) events: Vec<DomainEvent>,
}

impl User {
    /// A freshly registered user in `pending` status with no roles.
    pub fn register(email: Email, password_hash: String) -> Self {
        let now = Utc::now();
        let id = uuidv7();
        let events = vec![DomainEvent::UserRegistered {
            user_id: id,
            email: email.to_string(),
        }];
        Self {
            id,
            email,
            password_hash,
            status: UserStatus::Pending,
            role_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            events,
        }
    }

    /// Only active users may log in or refresh.
    pub fn can_authenticate(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn activate(&mut self) -> Result<()> {
        self.transition(UserStatus::Active)
    }

    pub fn deactivate(&mut self) -> Result<()> {
        self.transition(UserStatus::Inactive)
    }

    pub fn ban(&mut self) -> Result<()> {
        self.transition(UserStatus::Banned)
    }

    fn transition(&mut self, next: UserStatus) -> Result<()> {
        if self.status == next {
            return Err(AuthError::BusinessRule(format!("user is already {next}")));
        }
        if !self.status.can_transition_to(next) {
            return Err(AuthError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        let from = self.status;
        self.status = next;
        self.touch();
        self.events.push(DomainEvent::UserStatusChanged {
            user_id: self.id,
            from,
            to: next,
        });
        Ok(())
    }

    /// Assign a role. Assigning a role the user already holds is an error.
    pub fn assign_role(&mut self, role_id: Uuid) -> Result<()> {
        if self.role_ids.contains(&role_id) {
            return Err(AuthError::BusinessRule(format!(
                "role {role_id} is already assigned"
            )));
        }
        self.role_ids.push(role_id);
        self.touch();
        self.events.push(DomainEvent::UserRoleAssigned {
            user_id: self.id,
            role_id,
        });
        Ok(())
    }

    pub fn unassign_role(&mut self, role_id: Uuid) -> Result<()> {
        let before = self.role_ids.len();
        self.role_ids.retain(|id| *id != role_id);
        if self.role_ids.len() == before {
            return Err(AuthError::BusinessRule(format!(
                "role {role_id} is not assigned"
            )));
        }
        self.touch();
        self.events.push(DomainEvent::UserRoleUnassigned {
            user_id: self.id,
            role_id,
        });
        Ok(())
    }

    pub fn change_password_hash(&mut self, password_hash: String) {
        self.password_hash = password_hash;
        self.touch();
        self.events
            .push(DomainEvent::PasswordChanged { user_id: self.id });
    }

    /// Events recorded since the last drain.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.events
    }

    /// Drain the outbox. Call after the aggregate has been persisted.
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
