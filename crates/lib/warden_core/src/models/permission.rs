//! Permissions: `(resource, action)` pairs addressed by the code
//! `resource:action`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::uuid::uuidv7;

/// Domain permission.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(resource: &str, action: &str, description: Option<String>) -> Result<Self> {
        let resource = validate_segment("resource", resource)?;
        let action = validate_segment("action", action)?;
        let now = Utc::now();
        Ok(Self {
            id: uuidv7(),
            resource,
            action,
            description,
            is_system: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build from a `resource:action` code.
    pub fn from_code(code: &str, description: Option<String>) -> Result<Self> {
        let (resource, action) = code
            .split_once(':')
            .ok_or_else(|| AuthError::Validation(format!("permission code must be resource:action: {code}")))?;
        Self::new(resource, action, description)
    }

    pub fn code(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }

    /// Change the description. A system permission's description is frozen
    /// while any role still uses it.
    pub fn update_description(&mut self, description: Option<String>, in_use: bool) -> Result<()> {
        if self.is_system && in_use {
            return Err(AuthError::BusinessRule(format!(
                "system permission {} is in use and cannot be modified",
                self.code()
            )));
        }
        self.description = description;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        if self.is_system {
            return Err(AuthError::BusinessRule(format!(
                "system permission {} cannot be deleted",
                self.code()
            )));
        }
        Ok(())
    }
}

fn validate_segment(field: &str, raw: &str) -> Result<String> {
    let value = raw.trim();
    let mut chars = value.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        return Err(AuthError::Validation(format!("invalid permission {field}: {raw:?}")));
    }
    Ok(value.to_string())
}
