//! SurrealDB implementation of [`MembershipRepository`].

use bastion_core::error::BastionResult;
use bastion_core::models::membership::{
    CreateMembership, Membership, MembershipStatus, UpdateMembership,
};
use bastion_core::repository::{MembershipRepository, PaginatedResult, Pagination};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_uuid, total_of};
use crate::error::DbError;

/// Membership insert shared by every write path that creates one.
/// Expects `$membership_id`, `$tenant_id`, `$user_id`, `$role_id`,
/// `$membership_status`, `$invited_by` and `$now`.
pub(crate) const INSERT_MEMBERSHIP: &str = "\
    CREATE type::record('membership', $membership_id) SET \
    tenant_id = $tenant_id, user_id = $user_id, role_id = $role_id, \
    status = $membership_status, invited_by = $invited_by, \
    joined_at = $now, created_at = $now, updated_at = $now;";

pub(crate) fn parse_status(s: &str) -> Result<MembershipStatus, DbError> {
    match s {
        "active" => Ok(MembershipStatus::Active),
        "inactive" => Ok(MembershipStatus::Inactive),
        "pending" => Ok(MembershipStatus::Pending),
        other => Err(DbError::Decode(format!("unknown membership status: {other}"))),
    }
}

pub(crate) fn status_to_str(s: MembershipStatus) -> &'static str {
    match s {
        MembershipStatus::Active => "active",
        MembershipStatus::Inactive => "inactive",
        MembershipStatus::Pending => "pending",
    }
}

#[derive(Debug, SurrealValue)]
pub(crate) struct MembershipRow {
    record_id: String,
    tenant_id: String,
    user_id: String,
    role_id: String,
    status: String,
    invited_by: Option<String>,
    joined_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MembershipRow {
    pub(crate) fn try_into_membership(self) -> Result<Membership, DbError> {
        Ok(Membership {
            id: parse_uuid("membership", &self.record_id)?,
            tenant_id: parse_uuid("tenant", &self.tenant_id)?,
            user_id: self.user_id,
            role_id: parse_uuid("role", &self.role_id)?,
            status: parse_status(&self.status)?,
            invited_by: self.invited_by,
            joined_at: self.joined_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Membership repository.
#[derive(Clone)]
pub struct SurrealMembershipRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealMembershipRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<MembershipRow>, id: String) -> BastionResult<Membership> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("membership", id))?;
        Ok(row.try_into_membership()?)
    }
}

impl<C: Connection> MembershipRepository for SurrealMembershipRepository<C> {
    async fn create(&self, input: CreateMembership) -> BastionResult<Membership> {
        let id_str = Uuid::new_v4().to_string();
        let query = format!(
            "{INSERT_MEMBERSHIP} \
             SELECT meta::id(id) AS record_id, * \
             FROM type::record('membership', $membership_id);"
        );

        let result = self
            .db
            .query(query)
            .bind(("membership_id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("user_id", input.user_id))
            .bind(("role_id", input.role_id.to_string()))
            .bind(("membership_status", status_to_str(input.status).to_string()))
            .bind(("invited_by", input.invited_by))
            .bind(("now", Utc::now()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("membership", e))?;

        let rows: Vec<MembershipRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_id(&self, id: Uuid) -> BastionResult<Membership> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('membership', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_tenant_and_user(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> BastionResult<Membership> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM membership \
                 WHERE tenant_id = $tenant_id AND user_id = $user_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, format!("tenant={tenant_id},user={user_id}"))
    }

    async fn update(&self, id: Uuid, input: UpdateMembership) -> BastionResult<Membership> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.role_id.is_some() {
            sets.push("role_id = $role_id");
        }
        if input.status.is_some() {
            sets.push("status = $status");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('membership', $id) SET {}; \
             SELECT meta::id(id) AS record_id, * \
             FROM type::record('membership', $id);",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(role_id) = input.role_id {
            builder = builder.bind(("role_id", role_id.to_string()));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("status", status_to_str(status).to_string()));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("membership", e))?;

        let rows: Vec<MembershipRow> = result.take(1).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn delete(&self, id: Uuid) -> BastionResult<()> {
        self.db
            .query("DELETE type::record('membership', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Membership>> {
        let tenant_id_str = tenant_id.to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM membership \
                 WHERE tenant_id = $tenant_id GROUP ALL",
            )
            .bind(("tenant_id", tenant_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM membership \
                 WHERE tenant_id = $tenant_id \
                 ORDER BY joined_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(MembershipRow::try_into_membership)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_by_user(&self, user_id: &str) -> BastionResult<Vec<Membership>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM membership \
                 WHERE user_id = $user_id ORDER BY joined_at ASC",
            )
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(MembershipRow::try_into_membership)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn count_by_role(&self, role_id: Uuid) -> BastionResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM membership \
                 WHERE role_id = $role_id GROUP ALL",
            )
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(total_of(&rows))
    }
}
