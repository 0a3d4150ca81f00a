//! Policy domain model.
//!
//! A policy is a named bag of permissions that can be attached to any
//! number of roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Owning tenant, or `None` for a global policy.
    pub tenant_id: Option<Uuid>,
    /// Global policies are system policies and may only be edited by a
    /// platform admin.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePolicy {
    pub name: String,
    pub description: String,
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePolicy {
    pub name: Option<String>,
    pub description: Option<String>,
}
