//! SurrealDB implementation of [`PolicyRepository`].

use bastion_core::error::BastionResult;
use bastion_core::models::permission::Permission;
use bastion_core::models::policy::{CreatePolicy, Policy, UpdatePolicy};
use bastion_core::repository::{PaginatedResult, Pagination, PolicyRepository};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_optional_uuid, parse_uuid, total_of};
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
pub(crate) struct PolicyRow {
    record_id: String,
    name: String,
    description: String,
    tenant_id: Option<String>,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PolicyRow {
    pub(crate) fn try_into_policy(self) -> Result<Policy, DbError> {
        Ok(Policy {
            id: parse_uuid("policy", &self.record_id)?,
            name: self.name,
            description: self.description,
            tenant_id: parse_optional_uuid("tenant", self.tenant_id.as_deref())?,
            is_system: self.is_system,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct PolicyPermissionRow {
    record_id: String,
    service: String,
    entity: String,
    action: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// SurrealDB implementation of the Policy repository.
#[derive(Clone)]
pub struct SurrealPolicyRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPolicyRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<PolicyRow>, id: String) -> BastionResult<Policy> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("policy", id))?;
        Ok(row.try_into_policy()?)
    }
}

impl<C: Connection> PolicyRepository for SurrealPolicyRepository<C> {
    async fn create(&self, input: CreatePolicy) -> BastionResult<Policy> {
        let id_str = Uuid::new_v4().to_string();
        let is_system = input.tenant_id.is_none();

        let result = self
            .db
            .query(
                "CREATE type::record('policy', $id) SET \
                 name = $name, description = $description, \
                 tenant_id = $tenant_id, is_system = $is_system; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('policy', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("description", input.description))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("is_system", is_system))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("policy", e))?;

        let rows: Vec<PolicyRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_id(&self, id: Uuid) -> BastionResult<Policy> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('policy', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PolicyRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_name(&self, tenant_id: Option<Uuid>, name: &str) -> BastionResult<Policy> {
        let scope = match tenant_id {
            Some(_) => "tenant_id = $tenant_id",
            None => "tenant_id = NONE",
        };
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM policy \
             WHERE {scope} AND name = $name"
        );

        let mut result = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PolicyRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, format!("name={name}"))
    }

    async fn update(&self, id: Uuid, input: UpdatePolicy) -> BastionResult<Policy> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.description.is_some() {
            sets.push("description = $description");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('policy', $id) SET {}; \
             SELECT meta::id(id) AS record_id, * \
             FROM type::record('policy', $id);",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(description) = input.description {
            builder = builder.bind(("description", description));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("policy", e))?;

        let rows: Vec<PolicyRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn delete(&self, id: Uuid) -> BastionResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE role_policy WHERE out = type::record('policy', $id); \
                 DELETE policy_permission WHERE in = type::record('policy', $id); \
                 DELETE type::record('policy', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("policy", e))?;

        Ok(())
    }

    async fn list(
        &self,
        tenant_id: Option<Uuid>,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Policy>> {
        let scope = match tenant_id {
            Some(_) => "tenant_id = NONE OR tenant_id = $tenant_id",
            None => "tenant_id = NONE",
        };
        let tenant_id_str = tenant_id.map(|t| t.to_string());

        let mut count_result = self
            .db
            .query(format!(
                "SELECT count() AS total FROM policy WHERE {scope} GROUP ALL"
            ))
            .bind(("tenant_id", tenant_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(format!(
                "SELECT meta::id(id) AS record_id, * FROM policy \
                 WHERE {scope} ORDER BY name ASC \
                 LIMIT $limit START $offset"
            ))
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PolicyRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(PolicyRow::try_into_policy)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn add_permission(&self, policy_id: Uuid, permission_id: Uuid) -> BastionResult<()> {
        let query = format!(
            "RELATE policy:`{policy_id}` -> policy_permission -> permission:`{permission_id}`;"
        );

        let checked = self
            .db
            .query(query)
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("policy_permission", e));

        match checked {
            Ok(_) | Err(DbError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_permission(&self, policy_id: Uuid, permission_id: Uuid) -> BastionResult<()> {
        self.db
            .query(
                "DELETE policy_permission WHERE \
                 in = type::record('policy', $policy_id) AND \
                 out = type::record('permission', $permission_id)",
            )
            .bind(("policy_id", policy_id.to_string()))
            .bind(("permission_id", permission_id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn get_permissions(&self, policy_id: Uuid) -> BastionResult<Vec<Permission>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 WHERE id IN (\
                     SELECT VALUE out FROM policy_permission \
                     WHERE in = type::record('policy', $policy_id)\
                 ) \
                 ORDER BY service, entity, action",
            )
            .bind(("policy_id", policy_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PolicyPermissionRow> = result.take(0).map_err(DbError::from)?;
        let permissions = rows
            .into_iter()
            .map(|row| {
                Ok(Permission {
                    id: parse_uuid("permission", &row.record_id)?,
                    service: row.service,
                    entity: row.entity,
                    action: row.action,
                    description: row.description,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(permissions)
    }
}
