//! Core configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::password::DEFAULT_COST;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Inputs consumed by the authentication core.
#[derive(Clone)]
pub struct AuthConfig {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// HS256 signing secret.
    pub signing_secret: String,
    pub issuer: String,
    pub audience: String,
    /// Consecutive failures that trigger a lockout.
    pub lockout_threshold: u32,
    pub lockout_duration: Duration,
    /// Sliding window in which failures are counted.
    pub lockout_window: Duration,
    /// bcrypt cost factor. Out-of-range values fall back to the default.
    pub hash_cost: u32,
    /// Cap on concurrent sessions per user; the oldest are evicted on login.
    pub max_sessions_per_user: Option<usize>,
    /// Upper bound on each login/refresh/logout flow.
    pub operation_timeout: Duration,
}

impl Default for AuthConfig {
    /// Defaults with an empty signing secret; set one before use.
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            signing_secret: String::new(),
            issuer: "warden".into(),
            audience: "warden-api".into(),
            lockout_threshold: 5,
            lockout_duration: Duration::from_secs(15 * 60),
            lockout_window: Duration::from_secs(15 * 60),
            hash_cost: DEFAULT_COST,
            max_sessions_per_user: None,
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("signing_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("lockout_threshold", &self.lockout_threshold)
            .field("lockout_duration", &self.lockout_duration)
            .field("lockout_window", &self.lockout_window)
            .field("hash_cost", &self.hash_cost)
            .field("max_sessions_per_user", &self.max_sessions_per_user)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl AuthConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                          | Default                      |
    /// |-----------------------------------|------------------------------|
    /// | `WARDEN_ACCESS_TOKEN_TTL_SECS`    | `900`                        |
    /// | `WARDEN_REFRESH_TOKEN_TTL_SECS`   | `2592000` (30 days)          |
    /// | `WARDEN_JWT_SECRET` / `JWT_SECRET`| generated & persisted to file|
    /// | `WARDEN_JWT_ISSUER`               | `warden`                     |
    /// | `WARDEN_JWT_AUDIENCE`             | `warden-api`                 |
    /// | `WARDEN_LOCKOUT_THRESHOLD`        | `5`                          |
    /// | `WARDEN_LOCKOUT_DURATION_SECS`    | `900`                        |
    /// | `WARDEN_LOCKOUT_WINDOW_SECS`      | `900`                        |
    /// | `WARDEN_BCRYPT_COST`              | `12`                         |
    /// | `WARDEN_MAX_SESSIONS_PER_USER`    | unlimited                    |
    /// | `WARDEN_OPERATION_TIMEOUT_SECS`   | `10`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(raw) => parse_number::<u64>(key, &raw).map(Duration::from_secs),
                None => Ok(default),
            }
        };

        let signing_secret = match lookup("WARDEN_JWT_SECRET").or_else(|| lookup("JWT_SECRET")) {
            Some(secret) => secret,
            None => resolve_signing_secret(&signing_secret_path()),
        };

        let config = Self {
            access_token_ttl: secs("WARDEN_ACCESS_TOKEN_TTL_SECS", defaults.access_token_ttl)?,
            refresh_token_ttl: secs("WARDEN_REFRESH_TOKEN_TTL_SECS", defaults.refresh_token_ttl)?,
            signing_secret,
            issuer: lookup("WARDEN_JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: lookup("WARDEN_JWT_AUDIENCE").unwrap_or(defaults.audience),
            lockout_threshold: match lookup("WARDEN_LOCKOUT_THRESHOLD") {
                Some(raw) => parse_number("WARDEN_LOCKOUT_THRESHOLD", &raw)?,
                None => defaults.lockout_threshold,
            },
            lockout_duration: secs("WARDEN_LOCKOUT_DURATION_SECS", defaults.lockout_duration)?,
            lockout_window: secs("WARDEN_LOCKOUT_WINDOW_SECS", defaults.lockout_window)?,
            hash_cost: match lookup("WARDEN_BCRYPT_COST") {
                Some(raw) => parse_number("WARDEN_BCRYPT_COST", &raw)?,
                None => defaults.hash_cost,
            },
            max_sessions_per_user: lookup("WARDEN_MAX_SESSIONS_PER_USER")
                .map(|raw| parse_number("WARDEN_MAX_SESSIONS_PER_USER", &raw))
                .transpose()?,
            operation_timeout: secs("WARDEN_OPERATION_TIMEOUT_SECS", defaults.operation_timeout)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.trim().is_empty() {
            return Err(ConfigError::Validation("signing secret is empty".into()));
        }
        if self.access_token_ttl.is_zero() || self.refresh_token_ttl.is_zero() {
            return Err(ConfigError::Validation("token TTLs must be positive".into()));
        }
        if self.lockout_threshold == 0 {
            return Err(ConfigError::Validation("lockout threshold must be at least 1".into()));
        }
        if self.lockout_duration.is_zero() || self.lockout_window.is_zero() {
            return Err(ConfigError::Validation(
                "lockout duration and window must be positive".into(),
            ));
        }
        if self.max_sessions_per_user == Some(0) {
            return Err(ConfigError::Validation(
                "max sessions per user must be at least 1".into(),
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::Validation("operation timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> chrono::Duration {
        to_chrono(self.access_token_ttl)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        to_chrono(self.refresh_token_ttl)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Saturates instead of failing: TTLs beyond a century are effectively
/// unbounded.
fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Read the signing secret persisted at `path`, generating and persisting a
/// new one if the file is missing or empty.
pub fn resolve_signing_secret(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::write(path, &secret) {
        Ok(()) => info!(path = %path.display(), "generated new JWT signing secret"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not persist JWT signing secret"),
    }
    secret
}

/// Path to the persisted signing secret file.
pub fn signing_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("jwt-secret")
}
