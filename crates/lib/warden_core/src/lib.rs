//! # warden_core
//!
//! Authentication, session lifecycle and authorization core for Warden.
//!
//! The crate is storage-agnostic at its seams: sessions, the user/role
//! directory and the expiring key-value store are traits with Postgres,
//! in-memory and (optionally) Redis implementations. [`auth::AuthService`]
//! composes them into the login, refresh, logout and logout-all flows.

pub mod auth;
pub mod authz;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod kv;
pub mod migrate;
pub mod models;
pub mod session;
pub mod uuid;

pub use error::{AuthError, ErrorKind, Result};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
