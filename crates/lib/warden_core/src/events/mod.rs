//! Domain events and the fire-and-forget bus that publishes them.
//!
//! Aggregates collect events in an outbox; services drain the outbox after
//! the write has been persisted and hand the events to an
//! [`EventPublisher`]. Publication is best-effort: handler errors and panics
//! are logged and never reach the flow that produced the event.

pub mod audit;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::user::UserStatus;

/// Something that happened in the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    UserRegistered { user_id: Uuid, email: String },
    UserStatusChanged { user_id: Uuid, from: UserStatus, to: UserStatus },
    UserRoleAssigned { user_id: Uuid, role_id: Uuid },
    UserRoleUnassigned { user_id: Uuid, role_id: Uuid },
    PasswordChanged { user_id: Uuid },
    RoleUpdated { role_id: Uuid },
    RolePermissionGranted { role_id: Uuid, permission_id: Uuid },
    RolePermissionRevoked { role_id: Uuid, permission_id: Uuid },
    RoleDeleted { role_id: Uuid },
    LoginSucceeded { user_id: Uuid, session_id: Uuid },
    LoginFailed { email: String },
    AccountLocked { identifier: String },
    SessionRotated { user_id: Uuid, previous_session_id: Uuid, session_id: Uuid },
    SessionRevoked { user_id: Uuid, session_id: Uuid },
    AllSessionsRevoked { user_id: Uuid, count: u64 },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::UserRegistered { .. } => "user.registered",
            DomainEvent::UserStatusChanged { .. } => "user.status_changed",
            DomainEvent::UserRoleAssigned { .. } => "user.role_assigned",
            DomainEvent::UserRoleUnassigned { .. } => "user.role_unassigned",
            DomainEvent::PasswordChanged { .. } => "user.password_changed",
            DomainEvent::RoleUpdated { .. } => "role.updated",
            DomainEvent::RolePermissionGranted { .. } => "role.permission_granted",
            DomainEvent::RolePermissionRevoked { .. } => "role.permission_revoked",
            DomainEvent::RoleDeleted { .. } => "role.deleted",
            DomainEvent::LoginSucceeded { .. } => "auth.login_succeeded",
            DomainEvent::LoginFailed { .. } => "auth.login_failed",
            DomainEvent::AccountLocked { .. } => "auth.account_locked",
            DomainEvent::SessionRotated { .. } => "session.rotated",
            DomainEvent::SessionRevoked { .. } => "session.revoked",
            DomainEvent::AllSessionsRevoked { .. } => "session.all_revoked",
        }
    }
}

/// Implement to react to domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<(), AuthError>;

    /// Handler identifier for logging.
    fn name(&self) -> &str;
}

/// Fire-and-forget publication. Implementations must not block the caller
/// and must not let a failing subscriber fail the publisher.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);

    fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

/// Fans each event out to every handler on its own Tokio task.
pub struct EventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventBus {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }

    /// A bus with no subscribers (events are dropped).
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// The default bus: audit logging only.
    pub fn with_audit_log() -> Self {
        Self::new(vec![Arc::new(audit::AuditLogHandler)])
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::empty()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: DomainEvent) {
        if self.handlers.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = event.name(), "no runtime available, dropping domain event");
            return;
        };
        for handler in &self.handlers {
            let handler = Arc::clone(handler);
            let event = event.clone();
            let name = handler.name().to_string();
            let task = runtime.spawn(async move { handler.handle(&event).await });
            // Supervise the handler task so a panic is observed and logged.
            runtime.spawn(async move {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(handler = %name, error = %e, "event handler failed"),
                    Err(e) if e.is_panic() => error!(handler = %name, "event handler panicked"),
                    Err(e) => warn!(handler = %name, error = %e, "event handler cancelled"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    struct Forward(mpsc::UnboundedSender<&'static str>);

    #[async_trait]
    impl EventHandler for Forward {
        async fn handle(&self, event: &DomainEvent) -> Result<(), AuthError> {
            let _ = self.0.send(event.name());
            Ok(())
        }

        fn name(&self) -> &str {
            "Forward"
        }
    }

    struct Panics;

    #[async_trait]
    impl EventHandler for Panics {
        async fn handle(&self, _event: &DomainEvent) -> Result<(), AuthError> {
            panic!("subscriber bug");
        }

        fn name(&self) -> &str {
            "Panics"
        }
    }

    struct Fails;

    #[async_trait]
    impl EventHandler for Fails {
        async fn handle(&self, _event: &DomainEvent) -> Result<(), AuthError> {
            Err(AuthError::Internal("downstream unavailable".into()))
        }

        fn name(&self) -> &str {
            "Fails"
        }
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_do_not_affect_others() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = EventBus::new(vec![
            Arc::new(Panics),
            Arc::new(Fails),
            Arc::new(Forward(tx)),
        ]);

        bus.publish(DomainEvent::PasswordChanged {
            user_id: Uuid::nil(),
        });

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("handler should run")
            .expect("channel open");
        assert_eq!(received, "user.password_changed");
    }

    #[tokio::test]
    async fn publish_all_delivers_every_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = EventBus::new(vec![Arc::new(Forward(tx))]);
        bus.publish_all(vec![
            DomainEvent::RoleUpdated { role_id: Uuid::nil() },
            DomainEvent::RoleDeleted { role_id: Uuid::nil() },
        ]);

        let mut names = Vec::new();
        for _ in 0..2 {
            names.push(rx.recv().await.unwrap());
        }
        names.sort();
        assert_eq!(names, vec!["role.deleted", "role.updated"]);
    }

    #[test]
    fn publishing_without_a_runtime_is_a_no_op() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let bus = EventBus::new(vec![Arc::new(Forward(tx))]);
        bus.publish(DomainEvent::LoginFailed {
            email: "x@example.com".into(),
        });
    }
}
