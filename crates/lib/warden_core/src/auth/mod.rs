//! Authentication: password hashing, access/refresh tokens, lockout,
//! access-token revocation and the flows that compose them.

pub mod jwt;
pub mod lockout;
pub mod password;
pub mod revocation;
pub mod service;

pub use jwt::TokenCodec;
pub use lockout::{LockoutGuard, LockoutPolicy};
pub use password::{BcryptVerifier, CredentialVerifier};
pub use revocation::RevocationList;
pub use service::{AuthComponents, AuthService, AuthUser, LoginRequest, TokenPair};
