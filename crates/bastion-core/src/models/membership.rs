//! Membership domain model.
//!
//! A membership binds an externally verified user identifier to a tenant
//! with exactly one role. `(tenant_id, user_id)` is unique: changing a
//! member's role replaces `role_id` in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Opaque identifier issued by the external authentication service.
    pub user_id: String,
    pub role_id: Uuid,
    pub status: MembershipStatus,
    pub invited_by: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMembership {
    pub tenant_id: Uuid,
    pub user_id: String,
    pub role_id: Uuid,
    pub status: MembershipStatus,
    pub invited_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateMembership {
    pub role_id: Option<Uuid>,
    pub status: Option<MembershipStatus>,
}
