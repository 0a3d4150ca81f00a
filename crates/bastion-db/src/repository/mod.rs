//! SurrealDB repository implementations.

mod invitation;
mod membership;
mod permission;
mod platform_admin;
mod policy;
mod role;
mod system_user;
mod tenant;

pub use invitation::SurrealInvitationRepository;
pub use membership::SurrealMembershipRepository;
pub use permission::SurrealPermissionRepository;
pub use platform_admin::SurrealPlatformAdminRepository;
pub use policy::SurrealPolicyRepository;
pub use role::SurrealRoleRepository;
pub use system_user::SurrealSystemUserRepository;
pub use tenant::SurrealTenantRepository;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Result row of `SELECT count() AS total ... GROUP ALL`.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub(crate) total: u64,
}

/// Minimal projection of rows touched by a bulk `UPDATE`, used to count
/// them.
#[derive(Debug, SurrealValue)]
pub(crate) struct TouchedRow {
    #[allow(dead_code)]
    pub(crate) updated_at: chrono::DateTime<chrono::Utc>,
}

pub(crate) fn total_of(rows: &[CountRow]) -> u64 {
    rows.first().map(|r| r.total).unwrap_or(0)
}

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Decode(format!("invalid {field} UUID: {e}")))
}

pub(crate) fn parse_optional_uuid(
    field: &str,
    value: Option<&str>,
) -> Result<Option<Uuid>, DbError> {
    value.map(|v| parse_uuid(field, v)).transpose()
}
