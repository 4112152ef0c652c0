//! Password hashing via bcrypt.

use rand::distr::Alphanumeric;
use rand::{Rng, rng};

use crate::error::{AuthError, Result};

/// Lowest cost bcrypt accepts.
pub const MIN_COST: u32 = 4;

/// Highest cost bcrypt accepts.
pub const MAX_COST: u32 = 31;

/// Cost used when the configured one is out of range.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hashes and compares passwords.
///
/// `compare` must not reveal why a comparison failed: a mismatch and a
/// malformed hash both yield [`AuthError::AuthenticationFailed`].
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String>;

    fn compare(&self, hash: &str, plaintext: &str) -> Result<()>;

    /// Spend one comparison's worth of work against no real hash, so an
    /// unknown account costs the same as a wrong password.
    fn compare_dummy(&self, plaintext: &str) {
        let _ = plaintext;
    }
}

/// Clamp `cost` into bcrypt's accepted range, falling back to
/// [`DEFAULT_COST`].
pub fn clamp_cost(cost: u32) -> u32 {
    if (MIN_COST..=MAX_COST).contains(&cost) {
        cost
    } else {
        DEFAULT_COST
    }
}

/// Hash a password with bcrypt.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, clamp_cost(cost))
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

/// bcrypt-backed [`CredentialVerifier`].
#[derive(Debug, Clone)]
pub struct BcryptVerifier {
    cost: u32,
    dummy_hash: String,
}

impl BcryptVerifier {
    /// Build a verifier. Hashes one random string up front for
    /// [`CredentialVerifier::compare_dummy`].
    pub fn new(cost: u32) -> Result<Self> {
        let cost = clamp_cost(cost);
        let filler: String = rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let dummy_hash = hash_password(&filler, cost)?;
        Ok(Self { cost, dummy_hash })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl CredentialVerifier for BcryptVerifier {
    fn hash(&self, plaintext: &str) -> Result<String> {
        hash_password(plaintext, self.cost)
    }

    fn compare(&self, hash: &str, plaintext: &str) -> Result<()> {
        match verify_password(plaintext, hash) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthError::AuthenticationFailed),
            Err(_) => {
                // Malformed hash: burn the same time a real comparison takes.
                self.compare_dummy(plaintext);
                Err(AuthError::AuthenticationFailed)
            }
        }
    }

    fn compare_dummy(&self, plaintext: &str) {
        let _ = bcrypt::verify(plaintext, &self.dummy_hash);
    }
}
