//! Invitation domain model.
//!
//! An invitation offers a `(tenant, role)` pair to an email address. Its
//! token is single-use; only the SHA-256 hash of the token is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Normalized (trimmed, lower-cased) address.
    pub email: String,
    pub role_id: Uuid,
    pub invited_by: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub status: InvitationStatus,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invitation {
    /// Expiry is evaluated against the supplied clock, not the stored
    /// status, so a pending row past its deadline is already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn can_accept(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && !self.is_expired(now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvitation {
    pub tenant_id: Uuid,
    pub email: String,
    pub role_id: Uuid,
    pub invited_by: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn invitation(status: InvitationStatus, expires_at: DateTime<Utc>) -> Invitation {
        let now = Utc::now();
        Invitation {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: "bob@acme.com".into(),
            role_id: Uuid::new_v4(),
            invited_by: "alice".into(),
            token_hash: "hash".into(),
            status,
            accepted_by: None,
            accepted_at: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn pending_within_window_can_be_accepted() {
        let now = Utc::now();
        let inv = invitation(InvitationStatus::Pending, now + Duration::hours(72));
        assert!(inv.can_accept(now));
        assert!(!inv.can_accept(now + Duration::hours(72)));
    }

    #[test]
    fn terminal_states_cannot_be_accepted() {
        let now = Utc::now();
        for status in [
            InvitationStatus::Accepted,
            InvitationStatus::Expired,
            InvitationStatus::Cancelled,
        ] {
            let inv = invitation(status, now + Duration::hours(1));
            assert!(!inv.can_accept(now), "{status:?} must not be acceptable");
        }
    }
}
