//! End-to-end flows of `AuthService` over the in-memory collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;
use warden_core::auth::jwt::hash_refresh_secret;
use warden_core::auth::password::{BcryptVerifier, MIN_COST};
use warden_core::auth::{AuthComponents, AuthService, CredentialVerifier, LoginRequest};
use warden_core::config::AuthConfig;
use warden_core::directory::{MemoryDirectory, PermissionRepository, RoleRepository};
use warden_core::events::{DomainEvent, EventBus, EventPublisher};
use warden_core::kv::MemoryStore;
use warden_core::models::{ClientInfo, Permission, Role, RoleName};
use warden_core::session::{MemorySessionStore, SessionStore};
use warden_core::{AuthError, ErrorKind};

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "Password123!";

/// Counts every comparison, real or dummy.
struct CountingVerifier {
    inner: BcryptVerifier,
    compares: AtomicUsize,
    delay: Duration,
}

impl CountingVerifier {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            inner: BcryptVerifier::new(MIN_COST).unwrap(),
            compares: AtomicUsize::new(0),
            delay,
        }
    }

    fn compares(&self) -> usize {
        self.compares.load(Ordering::SeqCst)
    }
}

impl CredentialVerifier for CountingVerifier {
    fn hash(&self, plaintext: &str) -> warden_core::Result<String> {
        self.inner.hash(plaintext)
    }

    fn compare(&self, hash: &str, plaintext: &str) -> warden_core::Result<()> {
        self.compares.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.compare(hash, plaintext)
    }

    fn compare_dummy(&self, plaintext: &str) {
        self.compares.fetch_add(1, Ordering::SeqCst);
        self.inner.compare_dummy(plaintext);
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingPublisher {
    fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    service: AuthService,
    directory: Arc<MemoryDirectory>,
    sessions: Arc<MemorySessionStore>,
    verifier: Arc<CountingVerifier>,
    events: Arc<RecordingPublisher>,
}

fn config() -> AuthConfig {
    AuthConfig {
        signing_secret: "integration-test-secret-0123456789abcdef".into(),
        hash_cost: MIN_COST,
        ..AuthConfig::default()
    }
}

fn harness_with(config: AuthConfig, verifier: CountingVerifier) -> Harness {
    let directory = Arc::new(MemoryDirectory::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let verifier = Arc::new(verifier);
    let events = Arc::new(RecordingPublisher::default());
    let service = AuthService::new(
        config,
        AuthComponents {
            users: directory.clone(),
            roles: directory.clone(),
            permissions: directory.clone(),
            sessions: sessions.clone(),
            verifier: verifier.clone(),
            ephemeral: Arc::new(MemoryStore::new()),
            events: events.clone(),
        },
    );
    Harness {
        service,
        directory,
        sessions,
        verifier,
        events,
    }
}

fn harness() -> Harness {
    harness_with(config(), CountingVerifier::new())
}

impl Harness {
    async fn active_user(&self) -> Uuid {
        let user = self.service.register(EMAIL, PASSWORD).await.unwrap();
        self.service.activate_user(user.id).await.unwrap();
        user.id
    }

    async fn login(&self, password: &str) -> warden_core::Result<warden_core::auth::TokenPair> {
        self.service.login(LoginRequest::new(EMAIL, password)).await
    }
}

fn assert_auth_failure<T: std::fmt::Debug>(result: warden_core::Result<T>) {
    match result {
        Err(AuthError::AuthenticationFailed) => {}
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_issues_tokens_and_stores_only_the_hash() {
    let h = harness();
    let user_id = h.active_user().await;

    let pair = h.login(PASSWORD).await.unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 15 * 60);
    assert_eq!(pair.user.id, user_id);

    let stored = h
        .sessions
        .find_by_token_hash(&hash_refresh_secret(&pair.refresh_token))
        .await
        .unwrap();
    assert_eq!(stored.id, pair.session_id);
    assert_eq!(stored.user_id, user_id);
    assert!(!stored.revoked);
    assert_ne!(stored.token_hash, pair.refresh_token);

    let claims = h.service.verify_access_token(&pair.access_token).await.unwrap();
    assert_eq!(claims.user_id().unwrap(), user_id);
    assert_eq!(claims.email, EMAIL);
    assert!(h.events.names().contains(&"auth.login_succeeded"));
}

#[tokio::test]
async fn locked_identifier_is_rejected_without_checking_the_password() {
    let h = harness();
    h.active_user().await;
    for _ in 0..5 {
        h.service.lockout().record_failed_attempt(EMAIL).await.unwrap();
    }

    let before = h.verifier.compares();
    assert_auth_failure(h.login(PASSWORD).await);
    assert_eq!(h.verifier.compares(), before);
}

#[tokio::test]
async fn fifth_failure_locks_fourth_does_not() {
    let h = harness();
    h.active_user().await;

    for _ in 0..4 {
        assert_auth_failure(h.login("Wrong-password1").await);
    }
    assert!(!h.service.lockout().is_locked(EMAIL).await.unwrap().0);

    assert_auth_failure(h.login("Wrong-password1").await);
    assert!(h.service.lockout().is_locked(EMAIL).await.unwrap().0);

    // Even the right password is refused while locked.
    assert_auth_failure(h.login(PASSWORD).await);
    assert!(h.events.names().contains(&"auth.account_locked"));
}

#[tokio::test]
async fn successful_login_resets_the_failure_count() {
    let h = harness();
    h.active_user().await;

    for _ in 0..3 {
        assert_auth_failure(h.login("Wrong-password1").await);
    }
    h.login(PASSWORD).await.unwrap();
    assert_auth_failure(h.login("Wrong-password1").await);

    // One failure since the reset, so the next one is the second.
    let count = h.service.lockout().record_failed_attempt(EMAIL).await.unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn ip_address_is_locked_alongside_the_email() {
    let h = harness();
    h.active_user().await;
    let client = ClientInfo {
        device: None,
        ip: Some("203.0.113.7".into()),
    };

    for _ in 0..5 {
        let request = LoginRequest::new("nobody@example.com", "Wrong-password1").with_client(client.clone());
        assert_auth_failure(h.service.login(request).await);
    }
    assert!(h.service.lockout().is_locked("ip:203.0.113.7").await.unwrap().0);

    let request = LoginRequest::new(EMAIL, PASSWORD).with_client(client);
    assert_auth_failure(h.service.login(request).await);
    h.login(PASSWORD).await.unwrap();
}

#[tokio::test]
async fn unknown_email_looks_like_a_wrong_password() {
    let h = harness();
    h.active_user().await;

    let before = h.verifier.compares();
    let unknown = h
        .service
        .login(LoginRequest::new("mallory@example.com", PASSWORD))
        .await;
    assert_auth_failure(unknown);
    assert_eq!(h.verifier.compares(), before + 1);

    assert_auth_failure(h.login("Wrong-password1").await);
    assert_auth_failure(h.service.login(LoginRequest::new("not-an-email", PASSWORD)).await);
}

#[tokio::test]
async fn pending_user_cannot_log_in() {
    let h = harness();
    h.service.register(EMAIL, PASSWORD).await.unwrap();
    assert_auth_failure(h.login(PASSWORD).await);
}

#[tokio::test]
async fn session_cap_evicts_the_oldest_session() {
    let h = harness_with(
        AuthConfig {
            max_sessions_per_user: Some(2),
            ..config()
        },
        CountingVerifier::new(),
    );
    let user_id = h.active_user().await;

    let first = h.login(PASSWORD).await.unwrap();
    let second = h.login(PASSWORD).await.unwrap();
    let third = h.login(PASSWORD).await.unwrap();

    let active: Vec<Uuid> = h
        .service
        .list_sessions(user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(active.len(), 2);
    assert!(active.contains(&second.session_id));
    assert!(active.contains(&third.session_id));
    assert!(h.sessions.find_by_id(first.session_id).await.unwrap().revoked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_logins_respect_the_session_cap() {
    let h = harness_with(
        AuthConfig {
            max_sessions_per_user: Some(2),
            ..config()
        },
        CountingVerifier::new(),
    );
    let user_id = h.active_user().await;

    let (a, b, c, d) = tokio::join!(
        h.login(PASSWORD),
        h.login(PASSWORD),
        h.login(PASSWORD),
        h.login(PASSWORD)
    );
    for pair in [a, b, c, d] {
        pair.unwrap();
    }
    assert_eq!(h.service.list_sessions(user_id).await.unwrap().len(), 2);
    assert_eq!(h.sessions.len().await, 4);
}

#[tokio::test]
async fn oversized_lockout_window_still_locks() {
    let h = harness_with(
        AuthConfig {
            lockout_window: Duration::MAX,
            lockout_duration: Duration::MAX,
            ..config()
        },
        CountingVerifier::new(),
    );
    h.service.config().validate().unwrap();
    h.active_user().await;

    for _ in 0..5 {
        assert_auth_failure(h.login("Wrong-password1").await);
    }
    assert!(h.service.lockout().is_locked(EMAIL).await.unwrap().0);
}

#[tokio::test]
async fn slow_credential_check_times_out() {
    let h = harness_with(
        AuthConfig {
            operation_timeout: Duration::from_millis(50),
            ..config()
        },
        CountingVerifier::with_delay(Duration::from_millis(300)),
    );
    h.active_user().await;

    let err = h.login(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_rotates_and_retires_the_old_secret() {
    let h = harness();
    h.active_user().await;
    let original = h.login(PASSWORD).await.unwrap();

    let rotated = h
        .service
        .refresh(&original.refresh_token, ClientInfo::default())
        .await
        .unwrap();
    assert_ne!(rotated.refresh_token, original.refresh_token);
    assert_ne!(rotated.session_id, original.session_id);

    assert_auth_failure(
        h.service
            .refresh(&original.refresh_token, ClientInfo::default())
            .await,
    );
    h.service
        .refresh(&rotated.refresh_token, ClientInfo::default())
        .await
        .unwrap();

    let retired = h.sessions.find_by_id(original.session_id).await.unwrap();
    assert!(retired.revoked);
    assert!(retired.last_used_at.is_some());
}

#[tokio::test]
async fn refresh_keeps_client_info_unless_replaced() {
    let h = harness();
    h.active_user().await;
    let client = ClientInfo {
        device: Some("laptop".into()),
        ip: Some("198.51.100.1".into()),
    };
    let pair = h
        .service
        .login(LoginRequest::new(EMAIL, PASSWORD).with_client(client))
        .await
        .unwrap();

    let rotated = h
        .service
        .refresh(
            &pair.refresh_token,
            ClientInfo {
                device: None,
                ip: Some("198.51.100.2".into()),
            },
        )
        .await
        .unwrap();
    let session = h.sessions.find_by_id(rotated.session_id).await.unwrap();
    assert_eq!(session.device_info.as_deref(), Some("laptop"));
    assert_eq!(session.ip_address.as_deref(), Some("198.51.100.2"));
}

#[tokio::test]
async fn refresh_picks_up_role_changes() {
    let h = harness();
    let user_id = h.active_user().await;
    let pair = h.login(PASSWORD).await.unwrap();
    assert!(pair.user.permissions.is_empty());

    let perm = Permission::from_code("reports:read", None).unwrap();
    PermissionRepository::create(h.directory.as_ref(), &perm).await.unwrap();
    let mut role = Role::new(RoleName::parse("analyst").unwrap(), None, 1);
    role.grant_permission(perm.id).unwrap();
    RoleRepository::create(h.directory.as_ref(), &role).await.unwrap();

    let mut user = warden_core::directory::UserRepository::find_by_id(h.directory.as_ref(), user_id)
        .await
        .unwrap();
    user.assign_role(role.id).unwrap();
    warden_core::directory::UserRepository::update(h.directory.as_ref(), &user)
        .await
        .unwrap();

    let rotated = h
        .service
        .refresh(&pair.refresh_token, ClientInfo::default())
        .await
        .unwrap();
    assert_eq!(rotated.user.roles, ["analyst"]);
    assert_eq!(rotated.user.permissions, ["reports:read"]);
}

#[tokio::test]
async fn unknown_refresh_secret_is_an_authentication_failure() {
    let h = harness();
    assert_auth_failure(h.service.refresh("no-such-secret", ClientInfo::default()).await);
}

#[tokio::test]
async fn banned_user_cannot_refresh() {
    let h = harness();
    let user_id = h.active_user().await;
    let pair = h.login(PASSWORD).await.unwrap();

    h.service.ban_user(user_id).await.unwrap();
    assert_auth_failure(
        h.service
            .refresh(&pair.refresh_token, ClientInfo::default())
            .await,
    );
    assert!(h.service.list_sessions(user_id).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Logout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_revokes_session_and_denylists_access_token() {
    let h = harness();
    h.active_user().await;
    let pair = h.login(PASSWORD).await.unwrap();

    h.service
        .logout(&pair.refresh_token, Some(&pair.access_token))
        .await
        .unwrap();

    assert!(matches!(
        h.service.verify_access_token(&pair.access_token).await,
        Err(AuthError::TokenInvalid)
    ));
    assert_auth_failure(
        h.service
            .refresh(&pair.refresh_token, ClientInfo::default())
            .await,
    );

    // Repeating the logout, or presenting a secret nobody issued, succeeds.
    h.service.logout(&pair.refresh_token, None).await.unwrap();
    h.service.logout("never-issued", None).await.unwrap();
}

#[tokio::test]
async fn logout_all_revokes_every_session_but_keeps_the_records() {
    let h = harness();
    let user_id = h.active_user().await;
    for _ in 0..3 {
        h.login(PASSWORD).await.unwrap();
    }

    assert_eq!(h.service.logout_all(user_id, None).await.unwrap(), 3);

    assert!(h.sessions.find_active_by_user_id(user_id).await.unwrap().is_empty());
    let all = h.sessions.find_by_user_id(user_id).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|s| s.revoked));
}

#[tokio::test]
async fn revoke_session_refuses_other_users_sessions() {
    let h = harness();
    let owner = h.active_user().await;
    let pair = h.login(PASSWORD).await.unwrap();

    let err = h
        .service
        .revoke_session(Uuid::new_v4(), pair.session_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.service.revoke_session(owner, pair.session_id).await.unwrap();
    assert!(h.service.list_sessions(owner).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registration_assigns_default_roles() {
    let h = harness();
    let perm = Permission::from_code("profile:read", None).unwrap();
    PermissionRepository::create(h.directory.as_ref(), &perm).await.unwrap();
    let mut member = Role::new(RoleName::parse("member").unwrap(), None, 0);
    member.is_default = true;
    member.grant_permission(perm.id).unwrap();
    RoleRepository::create(h.directory.as_ref(), &member).await.unwrap();

    let user = h.service.register(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(user.role_ids, [member.id]);
    assert!(h.events.names().contains(&"user.registered"));

    h.service.activate_user(user.id).await.unwrap();
    let pair = h.login(PASSWORD).await.unwrap();
    assert_eq!(pair.user.roles, ["member"]);
    assert_eq!(pair.user.permissions, ["profile:read"]);
}

#[tokio::test]
async fn registration_rejects_duplicates_and_weak_passwords() {
    let h = harness();
    h.service.register(EMAIL, PASSWORD).await.unwrap();

    let duplicate = h.service.register("Alice@Example.com", PASSWORD).await.unwrap_err();
    assert_eq!(duplicate.kind(), ErrorKind::Conflict);

    let weak = h.service.register("bob@example.com", "short").await.unwrap_err();
    assert_eq!(weak.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn status_changes_follow_the_lifecycle() {
    let h = harness();
    let user_id = h.active_user().await;

    let again = h.service.activate_user(user_id).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::BusinessRuleViolation);

    h.service.login(LoginRequest::new(EMAIL, PASSWORD)).await.unwrap();
    h.service.deactivate_user(user_id).await.unwrap();
    assert!(h.service.list_sessions(user_id).await.unwrap().is_empty());

    h.service.ban_user(user_id).await.unwrap();
    let revive = h.service.activate_user(user_id).await.unwrap_err();
    assert_eq!(revive.kind(), ErrorKind::InvalidStatusTransition);
}

#[tokio::test]
async fn password_change_requires_current_password_and_ends_sessions() {
    let h = harness();
    let user_id = h.active_user().await;
    let pair = h.login(PASSWORD).await.unwrap();

    let wrong = h
        .service
        .change_password(user_id, "Wrong-password1", "NewPassword456!")
        .await
        .unwrap_err();
    assert_eq!(wrong.kind(), ErrorKind::AuthenticationFailure);

    h.service
        .change_password(user_id, PASSWORD, "NewPassword456!")
        .await
        .unwrap();
    assert_auth_failure(
        h.service
            .refresh(&pair.refresh_token, ClientInfo::default())
            .await,
    );
    assert_auth_failure(h.login(PASSWORD).await);
    h.login("NewPassword456!").await.unwrap();
}

#[tokio::test]
async fn sweep_removes_only_revoked_expired_sessions() {
    let h = harness();
    let user_id = h.active_user().await;
    h.login(PASSWORD).await.unwrap();
    h.service.logout_all(user_id, None).await.unwrap();

    // Revoked but not yet expired: kept.
    assert_eq!(h.service.sweep_expired_sessions().await.unwrap(), 0);
    assert_eq!(h.sessions.len().await, 1);
}

#[tokio::test]
async fn flows_run_on_the_audit_event_bus() {
    let directory = Arc::new(MemoryDirectory::new());
    let service = AuthService::new(
        config(),
        AuthComponents {
            users: directory.clone(),
            roles: directory.clone(),
            permissions: directory,
            sessions: Arc::new(MemorySessionStore::new()),
            verifier: Arc::new(CountingVerifier::new()),
            ephemeral: Arc::new(MemoryStore::new()),
            events: Arc::new(EventBus::with_audit_log()),
        },
    );

    let user = service.register(EMAIL, PASSWORD).await.unwrap();
    service.activate_user(user.id).await.unwrap();
    let pair = service.login(LoginRequest::new(EMAIL, PASSWORD)).await.unwrap();
    assert_eq!(service.logout_all(user.id, Some(&pair.access_token)).await.unwrap(), 1);
}
