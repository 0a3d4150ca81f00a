//! Membership administration.
//!
//! A user holds at most one membership per tenant; changing the role
//! rewrites `role_id` on the existing row.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::membership::{
    CreateMembership, Membership, MembershipStatus, UpdateMembership,
};
use bastion_core::models::role::{Role, RoleType};
use bastion_core::models::tenant::TenantStatus;
use bastion_core::repository::{
    MembershipRepository, PaginatedResult, Pagination, RoleRepository, TenantRepository,
};
use tracing::info;
use uuid::Uuid;

use crate::error::AuthzError;

/// Fetch a role and check it can be assigned inside `tenant_id`.
pub(crate) async fn assignable_role<R: RoleRepository>(
    role_repo: &R,
    tenant_id: Uuid,
    role_id: Uuid,
) -> BastionResult<Role> {
    let role = role_repo.get_by_id(role_id).await?;
    if !role.is_usable_in(tenant_id) {
        return Err(BastionError::validation(format!(
            "role '{}' belongs to another tenant",
            role.name
        )));
    }
    if role.role_type != RoleType::Tenant {
        return Err(BastionError::validation(format!(
            "role '{}' is a platform role and cannot be held through a membership",
            role.name
        )));
    }
    Ok(role)
}

pub struct MembershipService<M, R, T>
where
    M: MembershipRepository,
    R: RoleRepository,
    T: TenantRepository,
{
    membership_repo: M,
    role_repo: R,
    tenant_repo: T,
}

impl<M, R, T> MembershipService<M, R, T>
where
    M: MembershipRepository,
    R: RoleRepository,
    T: TenantRepository,
{
    pub fn new(membership_repo: M, role_repo: R, tenant_repo: T) -> Self {
        Self {
            membership_repo,
            role_repo,
            tenant_repo,
        }
    }

    /// Add an active member. Fails if the user already belongs to the
    /// tenant.
    pub async fn add_member(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        role_id: Uuid,
        added_by: Option<&str>,
    ) -> BastionResult<Membership> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(BastionError::validation("user_id must not be empty"));
        }

        let tenant = self.tenant_repo.get_by_id(tenant_id).await?;
        if tenant.status == TenantStatus::Deleted {
            return Err(BastionError::not_found("tenant", tenant_id));
        }
        assignable_role(&self.role_repo, tenant_id, role_id).await?;

        match self
            .membership_repo
            .get_by_tenant_and_user(tenant_id, user_id)
            .await
        {
            Ok(_) => return Err(AuthzError::AlreadyMember.into()),
            Err(BastionError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let membership = self
            .membership_repo
            .create(CreateMembership {
                tenant_id,
                user_id: user_id.to_string(),
                role_id,
                status: MembershipStatus::Active,
                invited_by: added_by.map(str::to_string),
            })
            .await
            .map_err(|e| match e {
                BastionError::AlreadyExists { .. } => AuthzError::AlreadyMember.into(),
                other => other,
            })?;
        info!(%tenant_id, user_id, %role_id, "member added");
        Ok(membership)
    }

    pub async fn get_member(&self, tenant_id: Uuid, user_id: &str) -> BastionResult<Membership> {
        self.membership_repo
            .get_by_tenant_and_user(tenant_id, user_id)
            .await
    }

    pub async fn list_members(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Membership>> {
        self.membership_repo
            .list_by_tenant(tenant_id, pagination)
            .await
    }

    pub async fn user_memberships(&self, user_id: &str) -> BastionResult<Vec<Membership>> {
        self.membership_repo.list_by_user(user_id).await
    }

    pub async fn change_role(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        role_id: Uuid,
    ) -> BastionResult<Membership> {
        let membership = self.get_member(tenant_id, user_id).await?;
        assignable_role(&self.role_repo, tenant_id, role_id).await?;

        let updated = self
            .membership_repo
            .update(
                membership.id,
                UpdateMembership {
                    role_id: Some(role_id),
                    status: None,
                },
            )
            .await?;
        info!(%tenant_id, user_id, %role_id, "member role changed");
        Ok(updated)
    }

    pub async fn set_status(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        status: MembershipStatus,
    ) -> BastionResult<Membership> {
        let membership = self.get_member(tenant_id, user_id).await?;
        let updated = self
            .membership_repo
            .update(
                membership.id,
                UpdateMembership {
                    role_id: None,
                    status: Some(status),
                },
            )
            .await?;
        info!(%tenant_id, user_id, ?status, "member status changed");
        Ok(updated)
    }

    pub async fn remove_member(&self, tenant_id: Uuid, user_id: &str) -> BastionResult<()> {
        let membership = self.get_member(tenant_id, user_id).await?;
        self.membership_repo.delete(membership.id).await?;
        info!(%tenant_id, user_id, "member removed");
        Ok(())
    }
}
