//! Access-token issuance/verification and refresh-secret handling.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::models::claims::AccessClaims;

/// Length of a refresh secret in alphanumeric characters.
pub const REFRESH_SECRET_LEN: usize = 64;

/// Signs and verifies HS256 access tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    pub fn new(secret: &[u8], issuer: &str, audience: &str, access_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss", "aud"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.signing_secret.as_bytes(),
            &config.issuer,
            &config.audience,
            config.access_ttl(),
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Mint a signed access token with a fresh random token id.
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        roles: &[String],
        permissions: &[String],
    ) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            roles: roles.to_vec(),
            permissions: permissions.to_vec(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify signature, issuer and audience, then expiry.
    ///
    /// Fails with [`AuthError::TokenExpired`] for a well-formed token past its
    /// expiry and [`AuthError::TokenInvalid`] for everything else.
    pub fn parse_access_token(&self, token: &str) -> Result<AccessClaims> {
        let data = decode::<AccessClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => {
                    debug!(error = %e, "access token rejected");
                    AuthError::TokenInvalid
                }
            }
        })?;
        let claims = data.claims;
        // Expiry is enforced here as well as in the decoder.
        if claims.is_expired() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }
}

/// Generate a cryptographically random refresh secret (64 alphanumeric chars).
pub fn generate_refresh_secret() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_SECRET_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a refresh secret for storage and lookup.
pub fn hash_refresh_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
