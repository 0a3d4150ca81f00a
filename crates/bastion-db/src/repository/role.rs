//! SurrealDB implementation of [`RoleRepository`].

use bastion_core::error::BastionResult;
use bastion_core::models::policy::Policy;
use bastion_core::models::role::{CreateRole, Role, RoleType, UpdateRole};
use bastion_core::repository::{PaginatedResult, Pagination, RoleRepository};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::policy::PolicyRow;
use super::{CountRow, parse_optional_uuid, parse_uuid, total_of};
use crate::error::DbError;

fn parse_role_type(s: &str) -> Result<RoleType, DbError> {
    match s {
        "tenant" => Ok(RoleType::Tenant),
        "platform" => Ok(RoleType::Platform),
        other => Err(DbError::Decode(format!("unknown role type: {other}"))),
    }
}

fn role_type_to_str(t: RoleType) -> &'static str {
    match t {
        RoleType::Tenant => "tenant",
        RoleType::Platform => "platform",
    }
}

#[derive(Debug, SurrealValue)]
struct RoleRow {
    record_id: String,
    name: String,
    role_type: String,
    description: String,
    tenant_id: Option<String>,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn try_into_role(self) -> Result<Role, DbError> {
        Ok(Role {
            id: parse_uuid("role", &self.record_id)?,
            name: self.name,
            role_type: parse_role_type(&self.role_type)?,
            description: self.description,
            tenant_id: parse_optional_uuid("tenant", self.tenant_id.as_deref())?,
            is_system: self.is_system,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Role repository.
#[derive(Clone)]
pub struct SurrealRoleRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealRoleRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<RoleRow>, id: String) -> BastionResult<Role> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("role", id))?;
        Ok(row.try_into_role()?)
    }
}

impl<C: Connection> RoleRepository for SurrealRoleRepository<C> {
    async fn create(&self, input: CreateRole) -> BastionResult<Role> {
        let id_str = Uuid::new_v4().to_string();
        let is_system = input.tenant_id.is_none();

        let result = self
            .db
            .query(
                "CREATE type::record('role', $id) SET \
                 name = $name, role_type = $role_type, \
                 description = $description, tenant_id = $tenant_id, \
                 is_system = $is_system; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('role', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("role_type", role_type_to_str(input.role_type).to_string()))
            .bind(("description", input.description))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("is_system", is_system))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("role", e))?;

        let rows: Vec<RoleRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_id(&self, id: Uuid) -> BastionResult<Role> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('role', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_name(&self, tenant_id: Option<Uuid>, name: &str) -> BastionResult<Role> {
        let scope = match tenant_id {
            Some(_) => "tenant_id = $tenant_id",
            None => "tenant_id = NONE",
        };
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM role \
             WHERE {scope} AND name = $name"
        );

        let mut result = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, format!("name={name}"))
    }

    async fn update(&self, id: Uuid, input: UpdateRole) -> BastionResult<Role> {
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
            "UPDATE type::record('role', $id) SET {}; \
             SELECT meta::id(id) AS record_id, * \
             FROM type::record('role', $id);",
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
            .map_err(|e| DbError::from_statement("role", e))?;

        let rows: Vec<RoleRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn delete(&self, id: Uuid) -> BastionResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE role_policy WHERE in = type::record('role', $id); \
                 DELETE type::record('role', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("role", e))?;

        Ok(())
    }

    async fn list(
        &self,
        tenant_id: Option<Uuid>,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Role>> {
        let scope = match tenant_id {
            Some(_) => "tenant_id = NONE OR tenant_id = $tenant_id",
            None => "tenant_id = NONE",
        };
        let tenant_id_str = tenant_id.map(|t| t.to_string());

        let mut count_result = self
            .db
            .query(format!(
                "SELECT count() AS total FROM role WHERE {scope} GROUP ALL"
            ))
            .bind(("tenant_id", tenant_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(format!(
                "SELECT meta::id(id) AS record_id, * FROM role \
                 WHERE {scope} ORDER BY name ASC \
                 LIMIT $limit START $offset"
            ))
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(RoleRow::try_into_role)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn add_policy(&self, role_id: Uuid, policy_id: Uuid) -> BastionResult<()> {
        let query = format!("RELATE role:`{role_id}` -> role_policy -> policy:`{policy_id}`;");

        let checked = self
            .db
            .query(query)
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("role_policy", e));

        match checked {
            Ok(_) | Err(DbError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_policy(&self, role_id: Uuid, policy_id: Uuid) -> BastionResult<()> {
        self.db
            .query(
                "DELETE role_policy WHERE \
                 in = type::record('role', $role_id) AND \
                 out = type::record('policy', $policy_id)",
            )
            .bind(("role_id", role_id.to_string()))
            .bind(("policy_id", policy_id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn get_policies(&self, role_id: Uuid) -> BastionResult<Vec<Policy>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM policy \
                 WHERE id IN (\
                     SELECT VALUE out FROM role_policy \
                     WHERE in = type::record('role', $role_id)\
                 ) \
                 ORDER BY name ASC",
            )
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PolicyRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(PolicyRow::try_into_policy)
            .collect::<Result<Vec<_>, DbError>>()?)
    }
}
