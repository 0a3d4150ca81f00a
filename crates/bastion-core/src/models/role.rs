//! Role domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the built-in role granted to tenant creators and managed
/// tenant admins.
pub const ADMIN_ROLE: &str = "Admin";

/// Built-in global roles that can never be deleted.
pub const SYSTEM_ROLES: [&str; 4] = [ADMIN_ROLE, "Writer", "Viewer", "Basic"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    /// Assignable through a tenant membership.
    Tenant,
    /// Reserved for platform-level operators.
    Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub role_type: RoleType,
    pub description: String,
    /// Owning tenant, or `None` for a global role.
    pub tenant_id: Option<Uuid>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Whether this role may be used inside `tenant_id`: global roles are
    /// usable everywhere, tenant roles only in their own tenant.
    pub fn is_usable_in(&self, tenant_id: Uuid) -> bool {
        self.tenant_id.is_none_or(|owner| owner == tenant_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    pub role_type: RoleType,
    pub description: String,
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub description: Option<String>,
}
