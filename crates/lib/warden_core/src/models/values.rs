//! Validated value objects for login input.

use std::fmt;

use crate::error::{AuthError, Result};

/// Maximum length of an email address (RFC 5321 path limit).
const MAX_EMAIL_LEN: usize = 254;

/// Minimum password length in bytes.
const MIN_PASSWORD_LEN: usize = 8;

/// bcrypt only looks at the first 72 bytes.
const MAX_PASSWORD_LEN: usize = 72;

/// A normalized (trimmed, lowercased) email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim().to_lowercase();
        if value.is_empty() {
            return Err(AuthError::Validation("email is required".into()));
        }
        if value.len() > MAX_EMAIL_LEN {
            return Err(AuthError::Validation(format!(
                "email must be at most {MAX_EMAIL_LEN} characters"
            )));
        }
        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !value.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(AuthError::Validation(format!("invalid email: {value}")));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A plaintext password that satisfies the password policy.
///
/// Policy: 8–72 bytes with at least one uppercase letter, one lowercase
/// letter and one digit.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if raw.len() > MAX_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "password must be at most {MAX_PASSWORD_LEN} bytes"
            )));
        }
        let has_upper = raw.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = raw.chars().any(|c| c.is_ascii_lowercase());
        let has_digit = raw.chars().any(|c| c.is_ascii_digit());
        if !(has_upper && has_lower && has_digit) {
            return Err(AuthError::Validation(
                "password must contain an uppercase letter, a lowercase letter and a digit".into(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}
