//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as lowercase strings
//! with ASSERT constraints for validation. Many-to-many links are
//! relation tables whose rows carry their own identity.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        name: "tenant_init_steps",
        sql: SCHEMA_V2,
    },
    Migration {
        version: 3,
        name: "tenant_activation",
        sql: SCHEMA_V3,
    },
];

// -----------------------------------------------------------------------
// Schema v1 — authorization catalog, memberships and lifecycles
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Permission catalog (global)
-- =======================================================================
DEFINE TABLE permission SCHEMAFULL;
DEFINE FIELD service ON TABLE permission TYPE string;
DEFINE FIELD entity ON TABLE permission TYPE string;
DEFINE FIELD action ON TABLE permission TYPE string;
DEFINE FIELD description ON TABLE permission TYPE string DEFAULT '';
DEFINE FIELD created_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_permission_key ON TABLE permission \
    COLUMNS service, entity, action UNIQUE;
DEFINE INDEX idx_permission_service ON TABLE permission COLUMNS service;

-- =======================================================================
-- Policies (tenant-scoped or global)
-- =======================================================================
DEFINE TABLE policy SCHEMAFULL;
DEFINE FIELD name ON TABLE policy TYPE string;
DEFINE FIELD description ON TABLE policy TYPE string DEFAULT '';
DEFINE FIELD tenant_id ON TABLE policy TYPE option<string>;
DEFINE FIELD is_system ON TABLE policy TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE policy TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE policy TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_policy_scope_name ON TABLE policy \
    COLUMNS tenant_id, name UNIQUE;

-- =======================================================================
-- Roles (tenant-scoped or global)
-- =======================================================================
DEFINE TABLE role SCHEMAFULL;
DEFINE FIELD name ON TABLE role TYPE string;
DEFINE FIELD role_type ON TABLE role TYPE string \
    ASSERT $value IN ['tenant', 'platform'];
DEFINE FIELD description ON TABLE role TYPE string DEFAULT '';
DEFINE FIELD tenant_id ON TABLE role TYPE option<string>;
DEFINE FIELD is_system ON TABLE role TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_role_scope_name ON TABLE role \
    COLUMNS tenant_id, name UNIQUE;

-- Role -> Policy
DEFINE TABLE role_policy TYPE RELATION IN role OUT policy SCHEMAFULL;
DEFINE FIELD created_at ON TABLE role_policy TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_role_policy_link ON TABLE role_policy \
    COLUMNS in, out UNIQUE;

-- Policy -> Permission
DEFINE TABLE policy_permission TYPE RELATION IN policy OUT permission \
    SCHEMAFULL;
DEFINE FIELD created_at ON TABLE policy_permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_policy_permission_link ON TABLE policy_permission \
    COLUMNS in, out UNIQUE;

-- =======================================================================
-- Tenants (global)
-- =======================================================================
DEFINE TABLE tenant SCHEMAFULL;
DEFINE FIELD name ON TABLE tenant TYPE string;
DEFINE FIELD slug ON TABLE tenant TYPE string;
DEFINE FIELD status ON TABLE tenant TYPE string \
    ASSERT $value IN ['pending', 'active', 'suspended', 'deleted'];
DEFINE FIELD metadata ON TABLE tenant TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD created_by ON TABLE tenant TYPE string;
DEFINE FIELD created_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD deleted_at ON TABLE tenant TYPE option<datetime>;
DEFINE INDEX idx_tenant_slug ON TABLE tenant COLUMNS slug UNIQUE;

-- =======================================================================
-- Memberships (one role per user per tenant)
-- =======================================================================
DEFINE TABLE membership SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE membership TYPE string;
DEFINE FIELD user_id ON TABLE membership TYPE string;
DEFINE FIELD role_id ON TABLE membership TYPE string;
DEFINE FIELD status ON TABLE membership TYPE string \
    ASSERT $value IN ['active', 'inactive', 'pending'];
DEFINE FIELD invited_by ON TABLE membership TYPE option<string>;
DEFINE FIELD joined_at ON TABLE membership TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD created_at ON TABLE membership TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE membership TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_membership_tenant_user ON TABLE membership \
    COLUMNS tenant_id, user_id UNIQUE;
DEFINE INDEX idx_membership_user ON TABLE membership COLUMNS user_id;
DEFINE INDEX idx_membership_role ON TABLE membership COLUMNS role_id;

-- =======================================================================
-- Platform admins (global)
-- =======================================================================
DEFINE TABLE platform_admin SCHEMAFULL;
DEFINE FIELD user_id ON TABLE platform_admin TYPE string;
DEFINE FIELD created_by ON TABLE platform_admin TYPE string;
DEFINE FIELD created_at ON TABLE platform_admin TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_platform_admin_user ON TABLE platform_admin \
    COLUMNS user_id UNIQUE;

-- =======================================================================
-- Invitations (tenant-scoped)
-- =======================================================================
DEFINE TABLE invitation SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE invitation TYPE string;
DEFINE FIELD email ON TABLE invitation TYPE string;
DEFINE FIELD role_id ON TABLE invitation TYPE string;
DEFINE FIELD invited_by ON TABLE invitation TYPE string;
DEFINE FIELD token_hash ON TABLE invitation TYPE string;
DEFINE FIELD status ON TABLE invitation TYPE string \
    ASSERT $value IN ['pending', 'accepted', 'expired', 'cancelled'];
DEFINE FIELD accepted_by ON TABLE invitation TYPE option<string>;
DEFINE FIELD accepted_at ON TABLE invitation TYPE option<datetime>;
DEFINE FIELD expires_at ON TABLE invitation TYPE datetime;
DEFINE FIELD created_at ON TABLE invitation TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE invitation TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_invitation_token ON TABLE invitation \
    COLUMNS token_hash UNIQUE;
DEFINE INDEX idx_invitation_tenant_email ON TABLE invitation \
    COLUMNS tenant_id, email;

-- =======================================================================
-- System users (machine credentials, one row per generation)
-- =======================================================================
DEFINE TABLE system_user SCHEMAFULL;
DEFINE FIELD name ON TABLE system_user TYPE string;
DEFINE FIELD application_name ON TABLE system_user TYPE string;
DEFINE FIELD email ON TABLE system_user TYPE string;
DEFINE FIELD user_id ON TABLE system_user TYPE string;
DEFINE FIELD description ON TABLE system_user TYPE string DEFAULT '';
DEFINE FIELD service_type ON TABLE system_user TYPE string \
    ASSERT $value IN ['worker', 'integration', 'cron', 'api'];
DEFINE FIELD secret_hash ON TABLE system_user TYPE string;
DEFINE FIELD is_active ON TABLE system_user TYPE bool DEFAULT true;
DEFINE FIELD is_primary ON TABLE system_user TYPE bool DEFAULT false;
DEFINE FIELD expires_at ON TABLE system_user TYPE option<datetime>;
DEFINE FIELD created_by ON TABLE system_user TYPE string;
DEFINE FIELD last_used_at ON TABLE system_user TYPE option<datetime>;
DEFINE FIELD metadata ON TABLE system_user TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD created_at ON TABLE system_user TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE system_user TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_system_user_name ON TABLE system_user \
    COLUMNS name UNIQUE;
DEFINE INDEX idx_system_user_email ON TABLE system_user \
    COLUMNS email UNIQUE;
DEFINE INDEX idx_system_user_user_id ON TABLE system_user \
    COLUMNS user_id UNIQUE;
DEFINE INDEX idx_system_user_application ON TABLE system_user \
    COLUMNS application_name;
";

// -----------------------------------------------------------------------
// Schema v2 — per-service initialization tracking
// -----------------------------------------------------------------------

const SCHEMA_V2: &str = "\
DEFINE TABLE tenant_init_step SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE tenant_init_step TYPE string;
DEFINE FIELD service ON TABLE tenant_init_step TYPE string;
DEFINE FIELD completed_at ON TABLE tenant_init_step TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_tenant_init_step ON TABLE tenant_init_step \
    COLUMNS tenant_id, service UNIQUE;
";

// -----------------------------------------------------------------------
// Schema v3 — first activation timestamp
// -----------------------------------------------------------------------

const SCHEMA_V3: &str = "\
DEFINE FIELD activated_at ON TABLE tenant TYPE option<datetime>;
UPDATE tenant SET activated_at = updated_at \
    WHERE status = 'active' AND activated_at = NONE;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            db.query(
                "CREATE _migration SET version = $version, \
                 name = $name",
            )
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

            info!(version = migration.version, "Migration applied");
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
///
/// Exposed for tests that want to inspect the DDL without running the
/// migration runner.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_v1_is_nonempty() {
        assert!(!SCHEMA_V1.is_empty());
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[0].version < window[1].version,
                "Migrations must be in ascending version order"
            );
        }
    }

    #[test]
    fn join_tables_enforce_unique_links() {
        assert!(SCHEMA_V1.contains("idx_role_policy_link"));
        assert!(SCHEMA_V1.contains("idx_policy_permission_link"));
        assert!(SCHEMA_V1.contains("idx_membership_tenant_user"));
    }
}
