//! Platform admin domain model.
//!
//! The existence of a row is the whole authorization signal: no expiry,
//! no scoping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAdmin {
    pub id: Uuid,
    pub user_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlatformAdmin {
    pub user_id: String,
    pub created_by: String,
}
