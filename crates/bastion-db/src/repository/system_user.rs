//! SurrealDB implementation of [`SystemUserRepository`].
//!
//! Rotation and regeneration demote the current primary and insert the
//! next generation inside one transaction, so an application never ends
//! up with two primaries or with none.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::system_user::{
    CreateSystemUser, ServiceType, SystemUser, SystemUserMetadata,
};
use bastion_core::repository::{PaginatedResult, Pagination, SystemUserRepository};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, TouchedRow, parse_uuid, total_of};
use crate::error::DbError;

/// Inserts the next generation as primary. Expects `$new_id`, the
/// `CreateSystemUser` fields and `$now`.
const INSERT_PRIMARY: &str = "\
    CREATE type::record('system_user', $new_id) SET \
    name = $name, application_name = $application_name, email = $email, \
    user_id = $user_id, description = $description, \
    service_type = $service_type, secret_hash = $secret_hash, \
    is_active = true, is_primary = true, expires_at = NONE, \
    created_by = $created_by, metadata = $metadata, \
    created_at = $now, updated_at = $now;";

fn parse_service_type(s: &str) -> Result<ServiceType, DbError> {
    match s {
        "worker" => Ok(ServiceType::Worker),
        "integration" => Ok(ServiceType::Integration),
        "cron" => Ok(ServiceType::Cron),
        "api" => Ok(ServiceType::Api),
        other => Err(DbError::Decode(format!("unknown service type: {other}"))),
    }
}

fn service_type_to_str(t: ServiceType) -> &'static str {
    match t {
        ServiceType::Worker => "worker",
        ServiceType::Integration => "integration",
        ServiceType::Cron => "cron",
        ServiceType::Api => "api",
    }
}

#[derive(Debug, SurrealValue)]
struct SystemUserRow {
    record_id: String,
    name: String,
    application_name: String,
    email: String,
    user_id: String,
    description: String,
    service_type: String,
    secret_hash: String,
    is_active: bool,
    is_primary: bool,
    expires_at: Option<DateTime<Utc>>,
    created_by: String,
    last_used_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SystemUserRow {
    fn try_into_system_user(self) -> Result<SystemUser, DbError> {
        let metadata: SystemUserMetadata = serde_json::from_value(self.metadata)
            .map_err(|e| DbError::Decode(format!("invalid system user metadata: {e}")))?;
        Ok(SystemUser {
            id: parse_uuid("system_user", &self.record_id)?,
            name: self.name,
            application_name: self.application_name,
            email: self.email,
            user_id: self.user_id,
            description: self.description,
            service_type: parse_service_type(&self.service_type)?,
            secret_hash: self.secret_hash,
            is_active: self.is_active,
            is_primary: self.is_primary,
            expires_at: self.expires_at,
            created_by: self.created_by,
            last_used_at: self.last_used_at,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// The swap guard and the new row must name the same application.
fn same_application(next: &CreateSystemUser, application_name: &str) -> BastionResult<()> {
    if next.application_name != application_name {
        return Err(BastionError::validation(format!(
            "generation '{}' belongs to '{}', not '{application_name}'",
            next.name, next.application_name
        )));
    }
    Ok(())
}

/// SurrealDB implementation of the SystemUser repository.
#[derive(Clone)]
pub struct SurrealSystemUserRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealSystemUserRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<SystemUserRow>, id: String) -> BastionResult<SystemUser> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("system_user", id))?;
        Ok(row.try_into_system_user()?)
    }

    fn collect(rows: Vec<SystemUserRow>) -> BastionResult<Vec<SystemUser>> {
        Ok(rows
            .into_iter()
            .map(SystemUserRow::try_into_system_user)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    /// Runs `guard` followed by the primary insert in one transaction and
    /// returns the inserted row.
    async fn insert_primary(
        &self,
        guard: &str,
        input: CreateSystemUser,
        old_expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> BastionResult<SystemUser> {
        let new_id = Uuid::new_v4();
        let metadata = serde_json::to_value(&input.metadata)
            .map_err(|e| DbError::Decode(format!("unencodable system user metadata: {e}")))?;
        let query = format!("BEGIN TRANSACTION; {guard} {INSERT_PRIMARY} COMMIT TRANSACTION;");

        self.db
            .query(query)
            .bind(("new_id", new_id.to_string()))
            .bind(("name", input.name))
            .bind(("application_name", input.application_name))
            .bind(("email", input.email))
            .bind(("user_id", input.user_id))
            .bind(("description", input.description))
            .bind((
                "service_type",
                service_type_to_str(input.service_type).to_string(),
            ))
            .bind(("secret_hash", input.secret_hash))
            .bind(("created_by", input.created_by))
            .bind(("metadata", metadata))
            .bind(("old_expires_at", old_expires_at))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("system_user", e))?;

        self.get_by_id(new_id).await
    }
}

impl<C: Connection> SystemUserRepository for SurrealSystemUserRepository<C> {
    async fn create(&self, input: CreateSystemUser) -> BastionResult<SystemUser> {
        self.insert_primary(
            "LET $existing = (SELECT VALUE id FROM system_user \
                 WHERE application_name = $application_name); \
             IF array::len($existing) > 0 { \
                 THROW 'application already has credentials' \
             };",
            input,
            None,
            Utc::now(),
        )
        .await
    }

    async fn get_by_id(&self, id: Uuid) -> BastionResult<SystemUser> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('system_user', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SystemUserRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_email(&self, email: &str) -> BastionResult<SystemUser> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM system_user \
                 WHERE email = $email",
            )
            .bind(("email", email.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SystemUserRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, format!("email={email}"))
    }

    async fn get_primary(&self, application_name: &str) -> BastionResult<SystemUser> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM system_user \
                 WHERE application_name = $application_name \
                 AND is_primary = true",
            )
            .bind(("application_name", application_name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SystemUserRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, format!("application={application_name}"))
    }

    async fn list(
        &self,
        active_only: bool,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<SystemUser>> {
        let filter = if active_only {
            "WHERE is_active = true"
        } else {
            ""
        };

        let mut count_result = self
            .db
            .query(format!(
                "SELECT count() AS total FROM system_user {filter} GROUP ALL"
            ))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(format!(
                "SELECT meta::id(id) AS record_id, * FROM system_user {filter} \
                 ORDER BY application_name ASC, created_at DESC \
                 LIMIT $limit START $offset"
            ))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SystemUserRow> = result.take(0).map_err(DbError::from)?;
        Ok(PaginatedResult {
            items: Self::collect(rows)?,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_by_application(&self, application_name: &str) -> BastionResult<Vec<SystemUser>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM system_user \
                 WHERE application_name = $application_name \
                 ORDER BY created_at DESC",
            )
            .bind(("application_name", application_name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SystemUserRow> = result.take(0).map_err(DbError::from)?;
        Self::collect(rows)
    }

    async fn count_by_application(&self, application_name: &str) -> BastionResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM system_user \
                 WHERE application_name = $application_name GROUP ALL",
            )
            .bind(("application_name", application_name.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(total_of(&rows))
    }

    async fn rotate(
        &self,
        application_name: &str,
        next: CreateSystemUser,
        old_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BastionResult<SystemUser> {
        same_application(&next, application_name)?;
        self.insert_primary(
            "LET $demoted = (UPDATE system_user SET \
                 is_primary = false, expires_at = $old_expires_at, \
                 updated_at = $now \
                 WHERE application_name = $application_name \
                 AND is_primary = true); \
             IF array::len($demoted) == 0 { \
                 THROW 'no primary credential to rotate' \
             };",
            next,
            Some(old_expires_at),
            now,
        )
        .await
    }

    async fn regenerate(
        &self,
        application_name: &str,
        next: CreateSystemUser,
        now: DateTime<Utc>,
    ) -> BastionResult<SystemUser> {
        same_application(&next, application_name)?;
        self.insert_primary(
            "LET $retired = (UPDATE system_user SET \
                 is_primary = false, is_active = false, expires_at = $now, \
                 updated_at = $now \
                 WHERE application_name = $application_name \
                 AND is_primary = true); \
             IF array::len($retired) == 0 { \
                 THROW 'no primary credential to regenerate' \
             };",
            next,
            None,
            now,
        )
        .await
    }

    async fn revoke_non_primary(
        &self,
        application_name: &str,
        now: DateTime<Utc>,
    ) -> BastionResult<u64> {
        let result = self
            .db
            .query(
                "UPDATE system_user SET \
                 is_active = false, expires_at = $now, updated_at = $now \
                 WHERE application_name = $application_name \
                 AND is_primary = false AND is_active = true",
            )
            .bind(("application_name", application_name.to_string()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("system_user", e))?;

        let rows: Vec<TouchedRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.len() as u64)
    }

    async fn deactivate(&self, id: Uuid, now: DateTime<Utc>) -> BastionResult<SystemUser> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('system_user', $id) SET \
                 is_active = false, updated_at = $now; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('system_user', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("system_user", e))?;

        let rows: Vec<SystemUserRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> BastionResult<u64> {
        let result = self
            .db
            .query(
                "UPDATE system_user SET is_active = false, updated_at = $now \
                 WHERE is_active = true AND expires_at != NONE \
                 AND expires_at <= $now",
            )
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("system_user", e))?;

        let rows: Vec<TouchedRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.len() as u64)
    }

    async fn record_last_used(&self, id: Uuid, now: DateTime<Utc>) -> BastionResult<()> {
        self.db
            .query(
                "UPDATE type::record('system_user', $id) SET \
                 last_used_at = $now",
            )
            .bind(("id", id.to_string()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("system_user", e))?;

        Ok(())
    }
}
