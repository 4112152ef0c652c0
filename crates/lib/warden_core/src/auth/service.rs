//! Login, refresh, logout and account flows.
//!
//! Every public operation runs under [`AuthConfig::operation_timeout`]. The
//! four session flows (login, refresh, logout, logout-all) collapse every
//! failure except timeouts and internal faults into
//! [`AuthError::AuthenticationFailed`]; the concrete reason is only logged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jwt::{TokenCodec, generate_refresh_secret, hash_refresh_secret};
use super::lockout::{LockoutGuard, LockoutPolicy};
use super::password::CredentialVerifier;
use super::revocation::RevocationList;
use crate::authz::{AuthorizationResolver, EffectiveAccess};
use crate::config::AuthConfig;
use crate::directory::{PermissionRepository, RoleRepository, UserRepository};
use crate::error::{AuthError, ErrorKind, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::kv::ExpiringStore;
use crate::models::{AccessClaims, ClientInfo, Email, Password, RefreshToken, User};
use crate::session::SessionStore;

/// Collaborators the service is built from.
#[derive(Clone)]
pub struct AuthComponents {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Backs both the lockout counters and the access-token denylist.
    pub ephemeral: Arc<dyn ExpiringStore>,
    pub events: Arc<dyn EventPublisher>,
}

/// Credentials presented at login.
#[derive(Clone, Default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub client: ClientInfo,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            client: ClientInfo::default(),
        }
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("client", &self.client)
            .finish()
    }
}

/// The authenticated principal as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Result of a login or refresh. The refresh secret appears here exactly
/// once; only its hash is stored.
#[derive(Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    pub session_id: Uuid,
    pub user: AuthUser,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("session_id", &self.session_id)
            .field("user", &self.user)
            .finish()
    }
}

/// Composes the credential verifier, token codec, session store, lockout
/// guard, revocation list and authorization resolver.
pub struct AuthService {
    config: AuthConfig,
    codec: TokenCodec,
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn CredentialVerifier>,
    events: Arc<dyn EventPublisher>,
    resolver: AuthorizationResolver,
    lockout: LockoutGuard,
    revocations: RevocationList,
}

impl AuthService {
    /// `config` is expected to have passed [`AuthConfig::validate`].
    pub fn new(config: AuthConfig, components: AuthComponents) -> Self {
        let AuthComponents {
            users,
            roles,
            permissions,
            sessions,
            verifier,
            ephemeral,
            events,
        } = components;
        Self {
            codec: TokenCodec::from_config(&config),
            resolver: AuthorizationResolver::new(Arc::clone(&roles), permissions),
            lockout: LockoutGuard::new(Arc::clone(&ephemeral), LockoutPolicy::from_config(&config)),
            revocations: RevocationList::new(ephemeral),
            config,
            users,
            roles,
            sessions,
            verifier,
            events,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn lockout(&self) -> &LockoutGuard {
        &self.lockout
    }

    pub fn revocations(&self) -> &RevocationList {
        &self.revocations
    }

    pub fn resolver(&self) -> &AuthorizationResolver {
        &self.resolver
    }

    // ------------------------------------------------------------------
    // Session flows
    // ------------------------------------------------------------------

    /// Authenticate with email and password and open a new session.
    pub async fn login(&self, request: LoginRequest) -> Result<TokenPair> {
        self.bounded("login", self.login_inner(request))
            .await
            .map_err(AuthError::into_uniform)
    }

    /// Exchange a refresh secret for a new token pair, retiring the old
    /// session.
    pub async fn refresh(&self, refresh_secret: &str, client: ClientInfo) -> Result<TokenPair> {
        self.bounded("refresh", self.refresh_inner(refresh_secret, client))
            .await
            .map_err(AuthError::into_uniform)
    }

    /// End the session behind `refresh_secret`. When the caller's current
    /// access token is given it is denylisted for the rest of its lifetime.
    /// An unknown or already revoked secret is not an error.
    pub async fn logout(&self, refresh_secret: &str, access_token: Option<&str>) -> Result<()> {
        self.bounded("logout", self.logout_inner(refresh_secret, access_token))
            .await
            .map_err(AuthError::into_uniform)
    }

    /// Revoke every session of `user_id`. Returns the number revoked.
    ///
    /// Access tokens already handed out stay usable until they expire,
    /// except `access_token` when given.
    pub async fn logout_all(&self, user_id: Uuid, access_token: Option<&str>) -> Result<u64> {
        self.bounded("logout_all", self.logout_all_inner(user_id, access_token))
            .await
            .map_err(AuthError::into_uniform)
    }

    /// Verify an access token and check it has not been revoked.
    ///
    /// Unlike the session flows this keeps `TokenExpired` and `TokenInvalid`
    /// apart so callers know whether a refresh is worth trying.
    pub async fn verify_access_token(&self, token: &str) -> Result<AccessClaims> {
        self.bounded("verify_access_token", async {
            let claims = self.codec.parse_access_token(token)?;
            let revoked = self
                .revocations
                .is_blacklisted(&claims.jti)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "revocation list unavailable, accepting token");
                    false
                });
            if revoked {
                debug!(jti = %claims.jti, "access token is revoked");
                return Err(AuthError::TokenInvalid);
            }
            Ok(claims)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Create a pending account with every default role assigned.
    pub async fn register(&self, email: &str, password: &str) -> Result<User> {
        self.bounded("register", async {
            let email = Email::parse(email)?;
            let password = Password::parse(password)?;
            let hash = self.hash_blocking(password.expose().to_string()).await?;

            let mut user = User::register(email, hash);
            for role in self.roles.find_defaults().await? {
                user.assign_role(role.id)?;
            }
            self.users.create(&user).await?;
            info!(user_id = %user.id, roles = user.role_ids.len(), "user registered");
            self.events.publish_all(user.take_events());
            Ok(user)
        })
        .await
    }

    pub async fn activate_user(&self, user_id: Uuid) -> Result<User> {
        self.bounded("activate_user", self.change_status(user_id, User::activate, false))
            .await
    }

    /// Deactivate and end every session of the user.
    pub async fn deactivate_user(&self, user_id: Uuid) -> Result<User> {
        self.bounded("deactivate_user", self.change_status(user_id, User::deactivate, true))
            .await
    }

    /// Ban permanently and end every session of the user.
    pub async fn ban_user(&self, user_id: Uuid) -> Result<User> {
        self.bounded("ban_user", self.change_status(user_id, User::ban, true))
            .await
    }

    /// Replace the password after checking the current one. Every session of
    /// the user is revoked.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        self.bounded("change_password", async {
            let mut user = self.users.find_by_id(user_id).await?;
            self.compare_blocking(user.password_hash.clone(), current_password.to_string())
                .await?;
            let password = Password::parse(new_password)?;
            let hash = self.hash_blocking(password.expose().to_string()).await?;

            user.change_password_hash(hash);
            self.users.update(&user).await?;
            self.events.publish_all(user.take_events());
            let revoked = self.revoke_all(user_id).await?;
            info!(user_id = %user_id, revoked, "password changed");
            Ok(())
        })
        .await
    }

    /// Active sessions of the user, newest first.
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        self.bounded("list_sessions", self.sessions.find_active_by_user_id(user_id))
            .await
    }

    /// Revoke one of the user's own sessions. A session owned by someone else
    /// is reported as not found.
    pub async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        self.bounded("revoke_session", async {
            let session = self.sessions.find_by_id(session_id).await?;
            if session.user_id != user_id {
                warn!(user_id = %user_id, session_id = %session_id, "revoke of foreign session refused");
                return Err(AuthError::NotFound("session"));
            }
            if !session.revoked {
                self.sessions.revoke(session_id).await?;
                self.events
                    .publish(DomainEvent::SessionRevoked { user_id, session_id });
            }
            Ok(())
        })
        .await
    }

    /// Hard-delete sessions that are both expired and revoked.
    pub async fn sweep_expired_sessions(&self) -> Result<u64> {
        self.bounded("sweep_expired_sessions", async {
            let deleted = self.sessions.delete_expired().await?;
            info!(deleted, "expired sessions swept");
            Ok(deleted)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Flow bodies
    // ------------------------------------------------------------------

    async fn login_inner(&self, request: LoginRequest) -> Result<TokenPair> {
        let email = Email::parse(&request.email)?;
        let identifiers = lockout_identifiers(&email, &request.client);

        for identifier in &identifiers {
            if self.is_locked(identifier).await {
                info!(email = %email, identifier, reason = "locked", "login rejected");
                self.events.publish(DomainEvent::LoginFailed {
                    email: email.to_string(),
                });
                return Err(AuthError::AuthenticationFailed);
            }
        }

        let user = match self.users.find_by_email(&email).await {
            Ok(user) => user,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.compare_dummy_blocking(request.password).await;
                self.record_failure(&identifiers, &email).await;
                info!(email = %email, reason = "unknown_email", "login rejected");
                return Err(AuthError::AuthenticationFailed);
            }
            Err(e) => return Err(e),
        };

        match self
            .compare_blocking(user.password_hash.clone(), request.password)
            .await
        {
            Ok(()) => {}
            Err(AuthError::AuthenticationFailed) => {
                self.record_failure(&identifiers, &email).await;
                info!(user_id = %user.id, reason = "bad_password", "login rejected");
                return Err(AuthError::AuthenticationFailed);
            }
            Err(e) => return Err(e),
        }

        if !user.can_authenticate() {
            info!(user_id = %user.id, status = %user.status, reason = "inactive", "login rejected");
            return Err(AuthError::AuthenticationFailed);
        }

        for identifier in &identifiers {
            if let Err(e) = self.lockout.reset_attempts(identifier).await {
                warn!(identifier, error = %e, "failed to reset lockout counter");
            }
        }

        let access = self.resolver.resolve(&user.role_ids).await;
        let (session, secret) = self.open_session(user.id, &request.client).await?;
        let pair = self.token_pair(&user, access, &session, secret)?;

        info!(user_id = %user.id, session_id = %session.id, "login succeeded");
        self.events.publish(DomainEvent::LoginSucceeded {
            user_id: user.id,
            session_id: session.id,
        });
        Ok(pair)
    }

    async fn refresh_inner(&self, refresh_secret: &str, client: ClientInfo) -> Result<TokenPair> {
        let current = self
            .sessions
            .find_by_token_hash(&hash_refresh_secret(refresh_secret))
            .await?;
        if !current.is_valid() {
            info!(
                session_id = %current.id,
                revoked = current.revoked,
                reason = "session_invalid",
                "refresh rejected"
            );
            return Err(AuthError::AuthenticationFailed);
        }

        let user = self.users.find_by_id(current.user_id).await?;
        if !user.can_authenticate() {
            info!(user_id = %user.id, status = %user.status, reason = "inactive", "refresh rejected");
            return Err(AuthError::AuthenticationFailed);
        }

        let access = self.resolver.resolve(&user.role_ids).await;
        let secret = generate_refresh_secret();
        let replacement = RefreshToken::issue(
            user.id,
            hash_refresh_secret(&secret),
            self.config.refresh_ttl(),
            &client.or(current.client()),
        );
        self.sessions.rotate(current.id, &replacement).await?;
        let pair = self.token_pair(&user, access, &replacement, secret)?;

        debug!(user_id = %user.id, from = %current.id, to = %replacement.id, "session rotated");
        self.events.publish(DomainEvent::SessionRotated {
            user_id: user.id,
            previous_session_id: current.id,
            session_id: replacement.id,
        });
        Ok(pair)
    }

    async fn logout_inner(&self, refresh_secret: &str, access_token: Option<&str>) -> Result<()> {
        let owner = match self
            .sessions
            .find_by_token_hash(&hash_refresh_secret(refresh_secret))
            .await
        {
            Ok(session) => {
                if !session.revoked {
                    self.sessions.revoke(session.id).await?;
                    self.events.publish(DomainEvent::SessionRevoked {
                        user_id: session.user_id,
                        session_id: session.id,
                    });
                }
                info!(user_id = %session.user_id, session_id = %session.id, "logged out");
                Some(session.user_id)
            }
            Err(AuthError::SessionNotFound) => {
                debug!("logout with unknown refresh token");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(token) = access_token {
            self.deny_access_token(token, owner).await;
        }
        Ok(())
    }

    async fn logout_all_inner(&self, user_id: Uuid, access_token: Option<&str>) -> Result<u64> {
        let count = self.revoke_all(user_id).await?;
        if let Some(token) = access_token {
            self.deny_access_token(token, Some(user_id)).await;
        }
        info!(user_id = %user_id, revoked = count, "logged out everywhere");
        Ok(count)
    }

    async fn change_status(
        &self,
        user_id: Uuid,
        transition: fn(&mut User) -> Result<()>,
        end_sessions: bool,
    ) -> Result<User> {
        let mut user = self.users.find_by_id(user_id).await?;
        transition(&mut user)?;
        self.users.update(&user).await?;
        self.events.publish_all(user.take_events());
        if end_sessions {
            self.revoke_all(user_id).await?;
        }
        info!(user_id = %user_id, status = %user.status, "user status changed");
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.config.operation_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = limit.as_millis() as u64, "operation timed out");
                Err(AuthError::Timeout(limit))
            }
        }
    }

    /// Lockout-store failures count as unlocked.
    async fn is_locked(&self, identifier: &str) -> bool {
        match self.lockout.is_locked(identifier).await {
            Ok((locked, remaining)) => {
                if locked {
                    debug!(identifier, remaining_secs = remaining.as_secs(), "identifier is locked");
                }
                locked
            }
            Err(e) => {
                warn!(identifier, error = %e, "lockout check failed, treating as unlocked");
                false
            }
        }
    }

    async fn record_failure(&self, identifiers: &[String], email: &Email) {
        let threshold = self.lockout.policy().threshold;
        for identifier in identifiers {
            match self.lockout.record_failed_attempt(identifier).await {
                Ok(count) if count >= threshold => {
                    self.events.publish(DomainEvent::AccountLocked {
                        identifier: identifier.clone(),
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(identifier, error = %e, "failed to record login failure"),
            }
        }
        self.events.publish(DomainEvent::LoginFailed {
            email: email.to_string(),
        });
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let count = self.sessions.revoke_all_by_user_id(user_id).await?;
        self.events
            .publish(DomainEvent::AllSessionsRevoked { user_id, count });
        Ok(count)
    }

    /// Insert a fresh session. With `max_sessions_per_user` set, the store
    /// evicts the oldest active sessions in the same step so that at most
    /// `max` remain.
    async fn open_session(
        &self,
        user_id: Uuid,
        client: &ClientInfo,
    ) -> Result<(RefreshToken, String)> {
        let secret = generate_refresh_secret();
        let session = RefreshToken::issue(
            user_id,
            hash_refresh_secret(&secret),
            self.config.refresh_ttl(),
            client,
        );
        let Some(max) = self.config.max_sessions_per_user else {
            self.sessions.create(&session).await?;
            return Ok((session, secret));
        };
        for session_id in self.sessions.create_capped(&session, max).await? {
            debug!(user_id = %user_id, session_id = %session_id, "session evicted by cap");
            self.events
                .publish(DomainEvent::SessionRevoked { user_id, session_id });
        }
        Ok((session, secret))
    }

    fn token_pair(
        &self,
        user: &User,
        access: EffectiveAccess,
        session: &RefreshToken,
        refresh_secret: String,
    ) -> Result<TokenPair> {
        let access_token = self.codec.issue_access_token(
            user.id,
            user.email.as_str(),
            &access.roles,
            &access.permissions,
        )?;
        Ok(TokenPair {
            access_token,
            refresh_token: refresh_secret,
            token_type: "Bearer",
            expires_in: self.codec.access_ttl().num_seconds(),
            session_id: session.id,
            user: AuthUser {
                id: user.id,
                email: user.email.to_string(),
                roles: access.roles,
                permissions: access.permissions,
            },
        })
    }

    /// Denylist `token` when it is still live and, if `owner` is known,
    /// belongs to them. Failures are logged; the token still expires on its
    /// own.
    async fn deny_access_token(&self, token: &str, owner: Option<Uuid>) {
        let claims = match self.codec.parse_access_token(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "access token not denylisted");
                return;
            }
        };
        if let Some(owner) = owner {
            if claims.user_id().ok() != Some(owner) {
                warn!(owner = %owner, sub = %claims.sub, "access token belongs to another user");
                return;
            }
        }
        if let Err(e) = self.revocations.add(&claims.jti, claims.exp).await {
            warn!(jti = %claims.jti, error = %e, "failed to denylist access token");
        }
    }

    async fn hash_blocking(&self, plaintext: String) -> Result<String> {
        let verifier = Arc::clone(&self.verifier);
        tokio::task::spawn_blocking(move || verifier.hash(&plaintext))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task failed: {e}")))?
    }

    async fn compare_blocking(&self, hash: String, plaintext: String) -> Result<()> {
        let verifier = Arc::clone(&self.verifier);
        tokio::task::spawn_blocking(move || verifier.compare(&hash, &plaintext))
            .await
            .map_err(|e| AuthError::Internal(format!("compare task failed: {e}")))?
    }

    async fn compare_dummy_blocking(&self, plaintext: String) {
        let verifier = Arc::clone(&self.verifier);
        if let Err(e) = tokio::task::spawn_blocking(move || verifier.compare_dummy(&plaintext)).await
        {
            warn!(error = %e, "dummy compare task failed");
        }
    }
}

/// Lockout keys for a login: the email, plus `ip:<addr>` when known.
fn lockout_identifiers(email: &Email, client: &ClientInfo) -> Vec<String> {
    let mut identifiers = vec![email.to_string()];
    if let Some(ip) = client.ip.as_deref().filter(|ip| !ip.is_empty()) {
        identifiers.push(format!("ip:{ip}"));
    }
    identifiers
}
