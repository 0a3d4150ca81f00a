//! Tenant domain model.
//!
//! Tenants are created `pending` and only become `active` once every
//! downstream service has been initialized for them. Deletion is soft:
//! the row stays with `status = deleted` and `deleted_at` set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current version of the [`TenantMetadata`] key-set.
pub const TENANT_METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Pending,
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// Globally unique, immutable after creation.
    pub slug: String,
    pub status: TenantStatus,
    pub metadata: TenantMetadata,
    /// User identifier of the creator.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the tenant first leaves `pending`. A tenant suspended
    /// before this is set has never been initialized.
    pub activated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Typed tenant metadata.
///
/// Unknown keys found in stored documents are ignored when reading, and
/// missing keys take their defaults, so older and newer writers can share
/// the same table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantMetadata {
    pub version: u32,
    pub display_name: Option<String>,
    pub industry: Option<String>,
    pub region: Option<String>,
    pub plan: Option<String>,
}

impl Default for TenantMetadata {
    fn default() -> Self {
        Self {
            version: TENANT_METADATA_VERSION,
            display_name: None,
            industry: None,
            region: None,
            plan: None,
        }
    }
}

/// Fields required to create a new tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub slug: String,
    pub metadata: Option<TenantMetadata>,
    pub created_by: String,
    /// When set, the creator is added as an active member with this role
    /// in the same transaction as the tenant insert.
    pub owner_role_id: Option<Uuid>,
}

/// Fields that can be updated on an existing tenant. The slug is not
/// among them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateTenant {
    pub name: Option<String>,
    pub metadata: Option<TenantMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_ignores_unknown_keys() {
        let raw = serde_json::json!({
            "version": 1,
            "industry": "retail",
            "legacy_flag": true,
            "nested": { "anything": [1, 2, 3] }
        });
        let meta: TenantMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.industry.as_deref(), Some("retail"));
        assert_eq!(meta.display_name, None);
    }

    #[test]
    fn metadata_defaults_missing_version() {
        let meta: TenantMetadata = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(meta.version, TENANT_METADATA_VERSION);
    }
}
