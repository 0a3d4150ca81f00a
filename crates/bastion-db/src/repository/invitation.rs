//! SurrealDB implementation of [`InvitationRepository`].
//!
//! Acceptance flips the invitation and inserts the membership in one
//! transaction guarded on `status = 'pending' AND expires_at > $now`, so
//! a token is consumed at most once and never without its membership.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::invitation::{CreateInvitation, Invitation, InvitationStatus};
use bastion_core::models::membership::{CreateMembership, Membership};
use bastion_core::repository::{InvitationRepository, PaginatedResult, Pagination};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::membership::{
    INSERT_MEMBERSHIP, MembershipRow, status_to_str as membership_status_to_str,
};
use super::{CountRow, TouchedRow, parse_uuid, total_of};
use crate::error::DbError;

fn parse_status(s: &str) -> Result<InvitationStatus, DbError> {
    match s {
        "pending" => Ok(InvitationStatus::Pending),
        "accepted" => Ok(InvitationStatus::Accepted),
        "expired" => Ok(InvitationStatus::Expired),
        "cancelled" => Ok(InvitationStatus::Cancelled),
        other => Err(DbError::Decode(format!("unknown invitation status: {other}"))),
    }
}

fn status_to_str(s: InvitationStatus) -> &'static str {
    match s {
        InvitationStatus::Pending => "pending",
        InvitationStatus::Accepted => "accepted",
        InvitationStatus::Expired => "expired",
        InvitationStatus::Cancelled => "cancelled",
    }
}

#[derive(Debug, SurrealValue)]
struct InvitationRow {
    record_id: String,
    tenant_id: String,
    email: String,
    role_id: String,
    invited_by: String,
    token_hash: String,
    status: String,
    accepted_by: Option<String>,
    accepted_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvitationRow {
    fn try_into_invitation(self) -> Result<Invitation, DbError> {
        Ok(Invitation {
            id: parse_uuid("invitation", &self.record_id)?,
            tenant_id: parse_uuid("tenant", &self.tenant_id)?,
            email: self.email,
            role_id: parse_uuid("role", &self.role_id)?,
            invited_by: self.invited_by,
            token_hash: self.token_hash,
            status: parse_status(&self.status)?,
            accepted_by: self.accepted_by,
            accepted_at: self.accepted_at,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Invitation repository.
#[derive(Clone)]
pub struct SurrealInvitationRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealInvitationRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<InvitationRow>, id: String) -> BastionResult<Invitation> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("invitation", id))?;
        Ok(row.try_into_invitation()?)
    }

    async fn get_membership(&self, id: &str) -> BastionResult<Membership> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('membership', $id)",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("membership", id))?;
        Ok(row.try_into_membership()?)
    }
}

impl<C: Connection> InvitationRepository for SurrealInvitationRepository<C> {
    async fn create(
        &self,
        input: CreateInvitation,
        now: DateTime<Utc>,
    ) -> BastionResult<Invitation> {
        let id = Uuid::new_v4();

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 UPDATE invitation SET status = 'expired', updated_at = $now \
                 WHERE tenant_id = $tenant_id AND email = $email \
                 AND status = 'pending' AND expires_at <= $now; \
                 LET $live = (SELECT VALUE id FROM invitation \
                     WHERE tenant_id = $tenant_id AND email = $email \
                     AND status = 'pending'); \
                 IF array::len($live) > 0 { \
                     THROW 'a pending invitation already exists for this email' \
                 }; \
                 CREATE type::record('invitation', $id) SET \
                 tenant_id = $tenant_id, email = $email, role_id = $role_id, \
                 invited_by = $invited_by, token_hash = $token_hash, \
                 status = 'pending', expires_at = $expires_at, \
                 created_at = $now, updated_at = $now; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("email", input.email))
            .bind(("role_id", input.role_id.to_string()))
            .bind(("invited_by", input.invited_by))
            .bind(("token_hash", input.token_hash))
            .bind(("expires_at", input.expires_at))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("invitation", e))?;

        self.get_by_id(id).await
    }

    async fn get_by_id(&self, id: Uuid) -> BastionResult<Invitation> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('invitation', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<InvitationRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, id_str)
    }

    async fn get_by_token_hash(&self, token_hash: &str) -> BastionResult<Invitation> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM invitation \
                 WHERE token_hash = $token_hash",
            )
            .bind(("token_hash", token_hash.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<InvitationRow> = result.take(0).map_err(DbError::from)?;
        Self::first(rows, "token".into())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        status: Option<InvitationStatus>,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Invitation>> {
        let filter = if status.is_some() {
            "tenant_id = $tenant_id AND status = $status"
        } else {
            "tenant_id = $tenant_id"
        };
        let tenant_id_str = tenant_id.to_string();
        let status_str = status.map(|s| status_to_str(s).to_string());

        let mut count_result = self
            .db
            .query(format!(
                "SELECT count() AS total FROM invitation WHERE {filter} GROUP ALL"
            ))
            .bind(("tenant_id", tenant_id_str.clone()))
            .bind(("status", status_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = total_of(&count_rows);

        let mut result = self
            .db
            .query(format!(
                "SELECT meta::id(id) AS record_id, * FROM invitation \
                 WHERE {filter} ORDER BY created_at DESC \
                 LIMIT $limit START $offset"
            ))
            .bind(("tenant_id", tenant_id_str))
            .bind(("status", status_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<InvitationRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(InvitationRow::try_into_invitation)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_pending_by_email(&self, email: &str) -> BastionResult<Vec<Invitation>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM invitation \
                 WHERE email = $email AND status = 'pending' \
                 ORDER BY created_at ASC",
            )
            .bind(("email", email.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<InvitationRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(InvitationRow::try_into_invitation)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> BastionResult<Invitation> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('invitation', $id) SET \
                 status = 'cancelled', updated_at = $now \
                 WHERE status = 'pending'; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('invitation', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("invitation", e))?;

        let touched: Vec<TouchedRow> = result.take(0).map_err(DbError::from)?;
        let rows: Vec<InvitationRow> = result.take(1).map_err(DbError::from)?;
        let invitation = Self::first(rows, id_str)?;
        if touched.is_empty() {
            return Err(BastionError::conflict(format!(
                "invitation is {} and can no longer be cancelled",
                status_to_str(invitation.status)
            )));
        }
        Ok(invitation)
    }

    async fn mark_expired(&self, id: Uuid, now: DateTime<Utc>) -> BastionResult<()> {
        self.db
            .query(
                "UPDATE type::record('invitation', $id) SET \
                 status = 'expired', updated_at = $now \
                 WHERE status = 'pending' AND expires_at <= $now",
            )
            .bind(("id", id.to_string()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("invitation", e))?;

        Ok(())
    }

    async fn accept(
        &self,
        id: Uuid,
        membership: CreateMembership,
        now: DateTime<Utc>,
    ) -> BastionResult<(Invitation, Membership)> {
        let membership_id = Uuid::new_v4().to_string();
        let query = format!(
            "BEGIN TRANSACTION; \
             LET $accepted = (UPDATE type::record('invitation', $id) SET \
                 status = 'accepted', accepted_by = $user_id, \
                 accepted_at = $now, updated_at = $now \
                 WHERE status = 'pending' AND expires_at > $now); \
             IF array::len($accepted) == 0 {{ \
                 THROW 'invitation is no longer pending' \
             }}; \
             {INSERT_MEMBERSHIP} \
             COMMIT TRANSACTION;"
        );

        self.db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("membership_id", membership_id.clone()))
            .bind(("tenant_id", membership.tenant_id.to_string()))
            .bind(("user_id", membership.user_id))
            .bind(("role_id", membership.role_id.to_string()))
            .bind((
                "membership_status",
                membership_status_to_str(membership.status).to_string(),
            ))
            .bind(("invited_by", membership.invited_by))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_transaction("membership", e))?;

        let invitation = self.get_by_id(id).await?;
        let membership = self.get_membership(&membership_id).await?;
        Ok((invitation, membership))
    }
}
