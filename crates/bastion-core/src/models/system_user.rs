//! System user (machine identity) domain model.
//!
//! Every credential generation of an application is its own row sharing
//! the same `application_name`. At most one row per application is
//! primary; a demoted row keeps authenticating until its `expires_at`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current version of the [`SystemUserMetadata`] key-set.
pub const SYSTEM_USER_METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Worker,
    Integration,
    Cron,
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemUser {
    pub id: Uuid,
    /// Unique generation name, e.g. `billing-sync-v2`.
    pub name: String,
    pub application_name: String,
    /// Login identifier, `<name>@<domain>`.
    pub email: String,
    /// Opaque user identifier used for tenant memberships.
    pub user_id: String,
    pub description: String,
    pub service_type: ServiceType,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub is_active: bool,
    pub is_primary: bool,
    /// Grace deadline for a demoted generation; `None` for the primary.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: SystemUserMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SystemUser {
    /// Live credential check. Expiry is evaluated independently of the
    /// active flag, so a row the sweep has not reached yet still fails.
    pub fn can_authenticate(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Typed system user metadata. Unknown stored keys are ignored on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemUserMetadata {
    pub version: u32,
    /// Team or person responsible for the application.
    pub owner: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl Default for SystemUserMetadata {
    fn default() -> Self {
        Self {
            version: SYSTEM_USER_METADATA_VERSION,
            owner: None,
            labels: BTreeMap::new(),
        }
    }
}

/// A fully formed credential row, ready to insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSystemUser {
    pub name: String,
    pub application_name: String,
    pub email: String,
    pub user_id: String,
    pub description: String,
    pub service_type: ServiceType,
    pub secret_hash: String,
    pub created_by: String,
    pub metadata: SystemUserMetadata,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn system_user(is_active: bool, expires_at: Option<DateTime<Utc>>) -> SystemUser {
        let now = Utc::now();
        SystemUser {
            id: Uuid::new_v4(),
            name: "billing-sync".into(),
            application_name: "billing-sync".into(),
            email: "billing-sync@system.internal".into(),
            user_id: "sys_1".into(),
            description: String::new(),
            service_type: ServiceType::Worker,
            secret_hash: String::new(),
            is_active,
            is_primary: expires_at.is_none(),
            expires_at,
            created_by: "admin".into(),
            last_used_at: None,
            metadata: SystemUserMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn primary_without_expiry_authenticates() {
        assert!(system_user(true, None).can_authenticate(Utc::now()));
    }

    #[test]
    fn expired_row_fails_even_when_active() {
        let now = Utc::now();
        let su = system_user(true, Some(now - Duration::seconds(1)));
        assert!(su.is_active);
        assert!(!su.can_authenticate(now));
    }

    #[test]
    fn inactive_row_fails() {
        assert!(!system_user(false, None).can_authenticate(Utc::now()));
    }
}
