//! SurrealDB implementation of [`PermissionRepository`].
//!
//! Resolution walks `membership -> role -> role_policy -> policy ->
//! policy_permission -> permission` in a single SELECT, so a check never
//! observes a half-applied set of link edits.

use std::collections::BTreeSet;

use bastion_core::error::BastionResult;
use bastion_core::models::permission::{
    CreatePermission, Permission, PermissionKey, UpdatePermission,
};
use bastion_core::repository::{PaginatedResult, Pagination, PermissionRepository};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_uuid, total_of};
use crate::error::DbError;

/// Permission ids reachable from the caller's active membership.
const REACHABLE_PERMISSIONS: &str = "\
    SELECT VALUE out FROM policy_permission WHERE in IN (\
        SELECT VALUE out FROM role_policy WHERE in IN (\
            SELECT VALUE type::record('role', role_id) FROM membership \
            WHERE tenant_id = $tenant_id AND user_id = $user_id \
            AND status = 'active'\
        )\
    )";

#[derive(Debug, SurrealValue)]
struct PermissionRow {
    record_id: String,
    service: String,
    entity: String,
    action: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRow {
    fn try_into_permission(self) -> Result<Permission, DbError> {
        Ok(Permission {
            id: parse_uuid("permission", &self.record_id)?,
            service: self.service,
            entity: self.entity,
            action: self.action,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct KeyRow {
    service: String,
    entity: String,
    action: String,
}

/// SurrealDB implementation of the Permission repository.
#[derive(Clone)]
pub struct SurrealPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<PermissionRow>, id: String) -> BastionResult<Permission> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("permission", id))?;
        Ok(row.try_into_permission()?)
    }
}

impl<C: Connection> PermissionRepository for SurrealPermissionRepository<C> {
    async fn create(&self, input: CreatePermission) -> BastionResult<Permission> {
        let id_str = Uuid::new_v4().to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('permission', $id) SET \
                 service = $service, entity = $entity, action = $action, \
                 description = $description; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('permission', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("service", input.service))
            .bind(("entity", input.entity))
            .bind(("action", input.action))
            .bind(("description", input.description))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("permission", e))?;

        let rows: Vec<PermissionRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_id(&self, id: Uuid) -> BastionResult<Permission> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('permission', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_key(&self, key: &PermissionKey) -> BastionResult<Permission> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 WHERE service = $service AND entity = $entity \
                 AND action = $action",
            )
            .bind(("service", key.service.clone()))
            .bind(("entity", key.entity.clone()))
            .bind(("action", key.action.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, key.to_string())
    }

    async fn update(&self, id: Uuid, input: UpdatePermission) -> BastionResult<Permission> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.description.is_some() {
            sets.push("description = $description");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('permission', $id) SET {}; \
             SELECT meta::id(id) AS record_id, * \
             FROM type::record('permission', $id);",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(description) = input.description {
            builder = builder.bind(("description", description));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("permission", e))?;

        let rows: Vec<PermissionRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn delete(&self, id: Uuid) -> BastionResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE policy_permission \
                 WHERE out = type::record('permission', $id); \
                 DELETE type::record('permission', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("permission", e))?;

        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> BastionResult<PaginatedResult<Permission>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM permission GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 ORDER BY service, entity, action \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(PermissionRow::try_into_permission)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_by_service(&self, service: &str) -> BastionResult<Vec<Permission>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 WHERE service = $service ORDER BY entity, action",
            )
            .bind(("service", service.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(PermissionRow::try_into_permission)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn count_policy_references(&self, id: Uuid) -> BastionResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM policy_permission \
                 WHERE out = type::record('permission', $id) GROUP ALL",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(total_of(&rows))
    }

    async fn resolve_for_member(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> BastionResult<Vec<PermissionKey>> {
        let query = format!(
            "SELECT service, entity, action FROM permission \
             WHERE id IN ({REACHABLE_PERMISSIONS})"
        );

        let mut result = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<KeyRow> = result.take(0).map_err(DbError::from)?;
        let keys: BTreeSet<PermissionKey> = rows
            .into_iter()
            .map(|row| PermissionKey {
                service: row.service,
                entity: row.entity,
                action: row.action,
            })
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn member_has_permission(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        key: &PermissionKey,
    ) -> BastionResult<bool> {
        let query = format!(
            "SELECT count() AS total FROM permission \
             WHERE service = $service AND entity = $entity \
             AND action = $action AND id IN ({REACHABLE_PERMISSIONS}) \
             GROUP ALL"
        );

        let mut result = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("service", key.service.clone()))
            .bind(("entity", key.entity.clone()))
            .bind(("action", key.action.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(total_of(&rows) > 0)
    }
}
