//! Domain models.
//!
//! Aggregates ([`user::User`], [`role::Role`]) enforce their own invariants
//! and collect [`crate::events::DomainEvent`]s that the caller drains after a
//! successful write.

pub mod claims;
pub mod permission;
pub mod role;
pub mod session;
pub mod user;
pub mod values;

pub use claims::AccessClaims;
pub use permission::Permission;
pub use role::{Role, RoleName};
pub use session::{ClientInfo, RefreshToken};
pub use user::{User, UserStatus};
pub use values::{Email, Password};
