//! Tenant access gate — request-time enforcement.
//!
//! Platform admins pass for any tenant without a membership lookup.
//! Everyone else needs an active membership. Every other outcome
//! (unknown tenant, no membership, inactive or pending membership) is
//! the same [`AuthzError::AccessDenied`], so callers cannot tell which
//! tenants exist.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::membership::Membership;
use bastion_core::models::platform_admin::{CreatePlatformAdmin, PlatformAdmin};
use bastion_core::repository::{
    MembershipRepository, PaginatedResult, Pagination, PlatformAdminRepository,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AuthzError;

/// Resolved access for one request. Hand it to
/// [`PermissionEngine::authorize_access`](crate::engine::PermissionEngine::authorize_access)
/// to skip a second membership lookup.
#[derive(Debug, Clone)]
pub enum TenantAccess {
    PlatformAdmin { tenant_id: Uuid, user_id: String },
    Member { membership: Membership },
}

impl TenantAccess {
    pub fn tenant_id(&self) -> Uuid {
        match self {
            Self::PlatformAdmin { tenant_id, .. } => *tenant_id,
            Self::Member { membership } => membership.tenant_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::PlatformAdmin { user_id, .. } => user_id,
            Self::Member { membership } => &membership.user_id,
        }
    }

    pub fn is_platform_admin(&self) -> bool {
        matches!(self, Self::PlatformAdmin { .. })
    }

    pub fn membership(&self) -> Option<&Membership> {
        match self {
            Self::PlatformAdmin { .. } => None,
            Self::Member { membership } => Some(membership),
        }
    }
}

/// Parse a tenant id taken from a path or header.
pub fn parse_tenant_id(raw: &str) -> Result<Uuid, AuthzError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthzError::MalformedTenantId(String::new()));
    }
    Uuid::parse_str(trimmed).map_err(|_| AuthzError::MalformedTenantId(trimmed.to_string()))
}

pub struct TenantAccessGate<M: MembershipRepository, A: PlatformAdminRepository> {
    membership_repo: M,
    admin_repo: A,
}

impl<M: MembershipRepository, A: PlatformAdminRepository> TenantAccessGate<M, A> {
    pub fn new(membership_repo: M, admin_repo: A) -> Self {
        Self {
            membership_repo,
            admin_repo,
        }
    }

    /// Decide whether `user_id` may act inside the tenant named by
    /// `raw_tenant_id`.
    pub async fn check(&self, user_id: &str, raw_tenant_id: &str) -> BastionResult<TenantAccess> {
        let tenant_id = parse_tenant_id(raw_tenant_id)?;
        if user_id.trim().is_empty() {
            return Err(AuthzError::AccessDenied.into());
        }

        if self.is_platform_admin(user_id).await? {
            debug!(%tenant_id, user_id, "platform admin bypass");
            return Ok(TenantAccess::PlatformAdmin {
                tenant_id,
                user_id: user_id.to_string(),
            });
        }

        match self
            .membership_repo
            .get_by_tenant_and_user(tenant_id, user_id)
            .await
        {
            Ok(membership) if membership.is_active() => Ok(TenantAccess::Member { membership }),
            Ok(membership) => {
                debug!(%tenant_id, user_id, status = ?membership.status, "membership not active");
                Err(AuthzError::AccessDenied.into())
            }
            Err(BastionError::NotFound { .. }) => {
                debug!(%tenant_id, user_id, "not a member");
                Err(AuthzError::AccessDenied.into())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn is_platform_admin(&self, user_id: &str) -> BastionResult<bool> {
        match self.admin_repo.get_by_user_id(user_id).await {
            Ok(_) => Ok(true),
            Err(BastionError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn grant_platform_admin(
        &self,
        user_id: &str,
        granted_by: &str,
    ) -> BastionResult<PlatformAdmin> {
        if user_id.trim().is_empty() {
            return Err(BastionError::validation("user_id must not be empty"));
        }
        if self.is_platform_admin(user_id).await? {
            return Err(BastionError::AlreadyExists {
                entity: "platform_admin".into(),
            });
        }

        let admin = self
            .admin_repo
            .create(CreatePlatformAdmin {
                user_id: user_id.to_string(),
                created_by: granted_by.to_string(),
            })
            .await?;
        info!(user_id, granted_by, "platform admin granted");
        Ok(admin)
    }

    pub async fn revoke_platform_admin(&self, user_id: &str) -> BastionResult<()> {
        // Surface NotFound for unknown users before deleting.
        self.admin_repo.get_by_user_id(user_id).await?;
        self.admin_repo.delete(user_id).await?;
        info!(user_id, "platform admin revoked");
        Ok(())
    }

    pub async fn list_platform_admins(
        &self,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<PlatformAdmin>> {
        self.admin_repo.list(pagination).await
    }
}
