//! Refresh-token (session) records.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::uuid::uuidv7;

/// Where a login came from. Both fields are informational.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub device: Option<String>,
    pub ip: Option<String>,
}

impl ClientInfo {
    /// Fill missing fields from `fallback`.
    pub fn or(self, fallback: ClientInfo) -> ClientInfo {
        ClientInfo {
            device: self.device.or(fallback.device),
            ip: self.ip.or(fallback.ip),
        }
    }
}

/// One authenticated device/session. Only the SHA-256 hash of the refresh
/// secret is stored.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

impl RefreshToken {
    pub fn issue(user_id: Uuid, token_hash: String, ttl: Duration, client: &ClientInfo) -> Self {
        let now = Utc::now();
        Self {
            id: uuidv7(),
            user_id,
            token_hash,
            expires_at: now + ttl,
            created_at: now,
            last_used_at: None,
            revoked: false,
            device_info: client.device.clone(),
            ip_address: client.ip.clone(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn client(&self) -> ClientInfo {
        ClientInfo {
            device: self.device_info.clone(),
            ip: self.ip_address.clone(),
        }
    }

    pub fn revoke(&mut self) {
        self.revoked = true;
    }

    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.last_used_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(ttl: Duration) -> RefreshToken {
        RefreshToken::issue(Uuid::new_v4(), "hash".into(), ttl, &ClientInfo::default())
    }

    #[test]
    fn fresh_token_is_valid() {
        assert!(token(Duration::days(1)).is_valid());
    }

    #[test]
    fn revoked_token_is_invalid() {
        let mut t = token(Duration::days(1));
        t.revoke();
        assert!(!t.is_valid());
    }

    #[test]
    fn expired_token_is_invalid() {
        let t = token(Duration::days(1));
        let later = t.expires_at + Duration::seconds(1);
        assert!(!t.is_valid_at(later));
        assert!(t.is_expired_at(t.expires_at));
    }

    #[test]
    fn client_info_fallback() {
        let merged = ClientInfo {
            device: None,
            ip: Some("10.0.0.2".into()),
        }
        .or(ClientInfo {
            device: Some("cli".into()),
            ip: Some("10.0.0.1".into()),
        });
        assert_eq!(merged.device.as_deref(), Some("cli"));
        assert_eq!(merged.ip.as_deref(), Some("10.0.0.2"));
    }
}
