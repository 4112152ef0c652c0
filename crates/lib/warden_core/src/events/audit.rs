//! Audit handler: writes every domain event to the log.

use async_trait::async_trait;
use tracing::info;

use super::{DomainEvent, EventHandler};
use crate::error::AuthError;

/// Logs each event at `info` with its name and payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLogHandler;

#[async_trait]
impl EventHandler for AuditLogHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<(), AuthError> {
        info!(target: "warden::audit", event = event.name(), details = ?event, "domain event");
        Ok(())
    }

    fn name(&self) -> &str {
        "AuditLogHandler"
    }
}
