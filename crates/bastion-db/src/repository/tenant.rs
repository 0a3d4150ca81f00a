//! SurrealDB implementation of [`TenantRepository`].

use bastion_core::error::BastionResult;
use bastion_core::models::membership::MembershipStatus;
use bastion_core::models::tenant::{
    CreateTenant, Tenant, TenantMetadata, TenantStatus, UpdateTenant,
};
use bastion_core::repository::{PaginatedResult, Pagination, TenantRepository};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::membership::{INSERT_MEMBERSHIP, status_to_str as membership_status_to_str};
use super::{CountRow, TouchedRow, parse_uuid, total_of};
use crate::error::DbError;

fn parse_status(s: &str) -> Result<TenantStatus, DbError> {
    match s {
        "pending" => Ok(TenantStatus::Pending),
        "active" => Ok(TenantStatus::Active),
        "suspended" => Ok(TenantStatus::Suspended),
        "deleted" => Ok(TenantStatus::Deleted),
        other => Err(DbError::Decode(format!("unknown tenant status: {other}"))),
    }
}

fn status_to_str(s: TenantStatus) -> &'static str {
    match s {
        TenantStatus::Pending => "pending",
        TenantStatus::Active => "active",
        TenantStatus::Suspended => "suspended",
        TenantStatus::Deleted => "deleted",
    }
}

fn metadata_to_value(metadata: &TenantMetadata) -> Result<serde_json::Value, DbError> {
    serde_json::to_value(metadata)
        .map_err(|e| DbError::Decode(format!("unencodable tenant metadata: {e}")))
}

#[derive(Debug, SurrealValue)]
struct TenantRow {
    record_id: String,
    name: String,
    slug: String,
    status: String,
    metadata: serde_json::Value,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TenantRow {
    fn try_into_tenant(self) -> Result<Tenant, DbError> {
        let metadata = serde_json::from_value(self.metadata)
            .map_err(|e| DbError::Decode(format!("invalid tenant metadata: {e}")))?;
        Ok(Tenant {
            id: parse_uuid("tenant", &self.record_id)?,
            name: self.name,
            slug: self.slug,
            status: parse_status(&self.status)?,
            metadata,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            activated_at: self.activated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// SurrealDB implementation of the Tenant repository.
#[derive(Clone)]
pub struct SurrealTenantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTenantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<TenantRow>, id: String) -> BastionResult<Tenant> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("tenant", id))?;
        Ok(row.try_into_tenant()?)
    }
}

impl<C: Connection> TenantRepository for SurrealTenantRepository<C> {
    async fn create(&self, input: CreateTenant) -> BastionResult<Tenant> {
        let id = Uuid::new_v4();
        let metadata = metadata_to_value(&input.metadata.unwrap_or_default())?;

        let owner_statement = if input.owner_role_id.is_some() {
            INSERT_MEMBERSHIP
        } else {
            ""
        };
        let query = format!(
            "BEGIN TRANSACTION; \
             CREATE type::record('tenant', $tenant_id) SET \
             name = $name, slug = $slug, status = 'pending', \
             metadata = $metadata, created_by = $user_id, \
             created_at = $now, updated_at = $now; \
             {owner_statement} \
             COMMIT TRANSACTION;"
        );

        self.db
            .query(query)
            .bind(("tenant_id", id.to_string()))
            .bind(("name", input.name))
            .bind(("slug", input.slug))
            .bind(("metadata", metadata))
            .bind(("user_id", input.created_by))
            .bind(("now", Utc::now()))
            .bind(("membership_id", Uuid::new_v4().to_string()))
            .bind(("role_id", input.owner_role_id.map(|r| r.to_string())))
            .bind((
                "membership_status",
                membership_status_to_str(MembershipStatus::Active).to_string(),
            ))
            .bind(("invited_by", None::<String>))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("tenant", e))?;

        self.get_by_id(id).await
    }

    async fn get_by_id(&self, id: Uuid) -> BastionResult<Tenant> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_slug(&self, slug: &str) -> BastionResult<Tenant> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM tenant \
                 WHERE slug = $slug",
            )
            .bind(("slug", slug.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, format!("slug={slug}"))
    }

    async fn update(&self, id: Uuid, input: UpdateTenant) -> BastionResult<Tenant> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.metadata.is_some() {
            sets.push("metadata = $metadata");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('tenant', $id) SET {}; \
             SELECT meta::id(id) AS record_id, * \
             FROM type::record('tenant', $id);",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(metadata) = input.metadata {
            builder = builder.bind(("metadata", metadata_to_value(&metadata)?));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("tenant", e))?;

        let rows: Vec<TenantRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> BastionResult<Tenant> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('tenant', $id) SET \
                 status = $status, updated_at = time::now(); \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("status", status_to_str(status).to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("tenant", e))?;

        let rows: Vec<TenantRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn activate_if_pending(&self, id: Uuid) -> BastionResult<bool> {
        let result = self
            .db
            .query(
                "UPDATE type::record('tenant', $id) SET \
                 status = 'active', activated_at = time::now(), \
                 updated_at = time::now() \
                 WHERE status = 'pending'",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("tenant", e))?;

        let rows: Vec<TouchedRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn soft_delete(&self, id: Uuid) -> BastionResult<Tenant> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('tenant', $id) SET \
                 status = 'deleted', deleted_at = time::now(), \
                 updated_at = time::now() \
                 WHERE status != 'deleted'; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant', $id);",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("tenant", e))?;

        let rows: Vec<TenantRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn purge(&self, id: Uuid) -> BastionResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 LET $roles = (SELECT VALUE id FROM role WHERE tenant_id = $id); \
                 LET $policies = (SELECT VALUE id FROM policy WHERE tenant_id = $id); \
                 DELETE role_policy WHERE in IN $roles OR out IN $policies; \
                 DELETE policy_permission WHERE in IN $policies; \
                 DELETE role WHERE tenant_id = $id; \
                 DELETE policy WHERE tenant_id = $id; \
                 DELETE membership WHERE tenant_id = $id; \
                 DELETE invitation WHERE tenant_id = $id; \
                 DELETE tenant_init_step WHERE tenant_id = $id; \
                 DELETE type::record('tenant', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("tenant", e))?;

        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> BastionResult<PaginatedResult<Tenant>> {
        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM tenant \
                 WHERE status != 'deleted' GROUP ALL",
            )
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM tenant \
                 WHERE status != 'deleted' \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(TenantRow::try_into_tenant)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_for_user(&self, user_id: &str) -> BastionResult<Vec<Tenant>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM tenant \
                 WHERE status != 'deleted' AND id IN (\
                     SELECT VALUE type::record('tenant', tenant_id) \
                     FROM membership \
                     WHERE user_id = $user_id AND status = 'active'\
                 ) \
                 ORDER BY name ASC",
            )
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(TenantRow::try_into_tenant)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn completed_init_services(&self, tenant_id: Uuid) -> BastionResult<Vec<String>> {
        let mut result = self
            .db
            .query(
                "SELECT VALUE service FROM tenant_init_step \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let services: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(services)
    }

    async fn record_init_service(&self, tenant_id: Uuid, service: &str) -> BastionResult<()> {
        let checked = self
            .db
            .query(
                "CREATE tenant_init_step SET \
                 tenant_id = $tenant_id, service = $service",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("service", service.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("tenant_init_step", e));

        match checked {
            Ok(_) | Err(DbError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
