//! Error taxonomy shared by every component of the core.
//!
//! A single [`AuthError`] enum carries every failure; [`AuthError::kind`]
//! folds it into the closed [`ErrorKind`] set that callers branch on
//! (status mapping, retry policy) without matching individual variants.

use std::time::Duration;

use thiserror::Error;

use crate::models::user::UserStatus;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    BusinessRuleViolation,
    InvalidStatusTransition,
    AuthenticationFailure,
    Timeout,
    Internal,
}

/// Authentication and authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// No session matches the presented refresh secret.
    #[error("Session not found")]
    SessionNotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: UserStatus, to: UserStatus },

    /// The only failure login and refresh report to their callers.
    #[error("Invalid credentials")]
    AuthenticationFailed,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token invalid")]
    TokenInvalid,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    DbError(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::NotFound(_) | AuthError::SessionNotFound => ErrorKind::NotFound,
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Conflict(_) => ErrorKind::Conflict,
            AuthError::BusinessRule(_) => ErrorKind::BusinessRuleViolation,
            AuthError::InvalidStatusTransition { .. } => ErrorKind::InvalidStatusTransition,
            AuthError::AuthenticationFailed | AuthError::TokenExpired | AuthError::TokenInvalid => {
                ErrorKind::AuthenticationFailure
            }
            AuthError::Timeout(_) => ErrorKind::Timeout,
            AuthError::DbError(_) | AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Collapse every client-distinguishable failure into
    /// [`AuthError::AuthenticationFailed`]. Timeouts and internal faults pass
    /// through untouched.
    pub(crate) fn into_uniform(self) -> AuthError {
        match self.kind() {
            ErrorKind::Timeout | ErrorKind::Internal => self,
            _ => AuthError::AuthenticationFailed,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AuthError::NotFound("row"),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AuthError::Conflict(conflict_message(db.constraint()))
            }
            other => AuthError::DbError(other),
        }
    }
}

/// Human-readable message for a unique-index violation.
fn conflict_message(constraint: Option<&str>) -> String {
    match constraint {
        Some("users_email_key") => "email already registered".to_string(),
        Some("roles_name_key") => "role name already exists".to_string(),
        Some("permissions_resource_action_key") => "permission code already exists".to_string(),
        Some(other) => format!("unique constraint {other} violated"),
        None => "unique constraint violated".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_are_authentication_failures() {
        assert_eq!(AuthError::TokenExpired.kind(), ErrorKind::AuthenticationFailure);
        assert_eq!(AuthError::TokenInvalid.kind(), ErrorKind::AuthenticationFailure);
        assert_eq!(AuthError::SessionNotFound.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn uniform_collapses_client_visible_failures() {
        let collapsed = [
            AuthError::SessionNotFound,
            AuthError::TokenExpired,
            AuthError::NotFound("user"),
            AuthError::BusinessRule("locked".into()),
        ];
        for e in collapsed {
            assert!(matches!(e.into_uniform(), AuthError::AuthenticationFailed));
        }
    }

    #[test]
    fn uniform_keeps_timeouts_and_internal_errors() {
        let timeout = AuthError::Timeout(Duration::from_secs(1)).into_uniform();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let internal = AuthError::Internal("boom".into()).into_uniform();
        assert_eq!(internal.kind(), ErrorKind::Internal);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let e = AuthError::from(sqlx::Error::RowNotFound);
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn conflict_messages_hide_storage_vocabulary() {
        assert_eq!(
            conflict_message(Some("users_email_key")),
            "email already registered"
        );
        assert_eq!(conflict_message(None), "unique constraint violated");
    }
}
