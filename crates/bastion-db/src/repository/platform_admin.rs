//! SurrealDB implementation of [`PlatformAdminRepository`].

use bastion_core::error::BastionResult;
use bastion_core::models::platform_admin::{CreatePlatformAdmin, PlatformAdmin};
use bastion_core::repository::{PaginatedResult, Pagination, PlatformAdminRepository};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_uuid, total_of};
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct PlatformAdminRow {
    record_id: String,
    user_id: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl PlatformAdminRow {
    fn try_into_platform_admin(self) -> Result<PlatformAdmin, DbError> {
        Ok(PlatformAdmin {
            id: parse_uuid("platform_admin", &self.record_id)?,
            user_id: self.user_id,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

/// SurrealDB implementation of the PlatformAdmin repository.
#[derive(Clone)]
pub struct SurrealPlatformAdminRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPlatformAdminRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> PlatformAdminRepository for SurrealPlatformAdminRepository<C> {
    async fn create(&self, input: CreatePlatformAdmin) -> BastionResult<PlatformAdmin> {
        let id_str = Uuid::new_v4().to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('platform_admin', $id) SET \
                 user_id = $user_id, created_by = $created_by; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('platform_admin', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("user_id", input.user_id))
            .bind(("created_by", input.created_by))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("platform_admin", e))?;

        let rows: Vec<PlatformAdminRow> = result.take(1).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("platform_admin", id_str))?;
        Ok(row.try_into_platform_admin()?)
    }

    async fn get_by_user_id(&self, user_id: &str) -> BastionResult<PlatformAdmin> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM platform_admin \
                 WHERE user_id = $user_id",
            )
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PlatformAdminRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("platform_admin", format!("user_id={user_id}")))?;
        Ok(row.try_into_platform_admin()?)
    }

    async fn delete(&self, user_id: &str) -> BastionResult<()> {
        self.db
            .query("DELETE platform_admin WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> BastionResult<PaginatedResult<PlatformAdmin>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM platform_admin GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM platform_admin \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PlatformAdminRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(PlatformAdminRow::try_into_platform_admin)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
