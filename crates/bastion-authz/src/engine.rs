//! Permission resolution engine.
//!
//! A decision walks membership → role → policies → permissions. The walk
//! is a single repository read, so a concurrent policy edit is either
//! fully visible or not at all. Users without an active membership are
//! denied before any traversal happens.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::membership::Membership;
use bastion_core::models::permission::PermissionKey;
use bastion_core::repository::{MembershipRepository, PermissionRepository, PlatformAdminRepository};
use tracing::debug;
use uuid::Uuid;

use crate::config::{AuthorizationConfig, PermissionMatching};
use crate::gate::TenantAccess;

pub struct PermissionEngine<P, M, A>
where
    P: PermissionRepository,
    M: MembershipRepository,
    A: PlatformAdminRepository,
{
    permission_repo: P,
    membership_repo: M,
    admin_repo: A,
    matching: PermissionMatching,
}

impl<P, M, A> PermissionEngine<P, M, A>
where
    P: PermissionRepository,
    M: MembershipRepository,
    A: PlatformAdminRepository,
{
    pub fn new(
        permission_repo: P,
        membership_repo: M,
        admin_repo: A,
        config: &AuthorizationConfig,
    ) -> Self {
        Self {
            permission_repo,
            membership_repo,
            admin_repo,
            matching: config.matching,
        }
    }

    /// Whether `user_id` may perform `service:entity:action` in the
    /// tenant. Platform admins are allowed everything everywhere.
    pub async fn authorize(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        service: &str,
        entity: &str,
        action: &str,
    ) -> BastionResult<bool> {
        let requested = PermissionKey::new(service, entity, action)?;

        match self.admin_repo.get_by_user_id(user_id).await {
            Ok(_) => {
                debug!(%tenant_id, user_id, permission = %requested, "platform admin allowed");
                return Ok(true);
            }
            Err(BastionError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let Some(membership) = self.active_membership(tenant_id, user_id).await? else {
            debug!(%tenant_id, user_id, permission = %requested, "denied: no active membership");
            return Ok(false);
        };

        self.check_member(&membership, &requested).await
    }

    /// Same decision as [`authorize`](Self::authorize), reusing the access
    /// already resolved by the gate for this request.
    pub async fn authorize_access(
        &self,
        access: &TenantAccess,
        service: &str,
        entity: &str,
        action: &str,
    ) -> BastionResult<bool> {
        let requested = PermissionKey::new(service, entity, action)?;
        match access {
            TenantAccess::PlatformAdmin { .. } => Ok(true),
            TenantAccess::Member { membership } if membership.is_active() => {
                self.check_member(membership, &requested).await
            }
            TenantAccess::Member { .. } => Ok(false),
        }
    }

    /// Every permission the user holds in the tenant as sorted,
    /// de-duplicated `service:entity:action` strings. Empty without an
    /// active membership.
    pub async fn user_permissions(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> BastionResult<Vec<String>> {
        if self.active_membership(tenant_id, user_id).await?.is_none() {
            return Ok(Vec::new());
        }

        let keys = self
            .permission_repo
            .resolve_for_member(tenant_id, user_id)
            .await?;
        Ok(keys.iter().map(ToString::to_string).collect())
    }

    async fn active_membership(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> BastionResult<Option<Membership>> {
        match self
            .membership_repo
            .get_by_tenant_and_user(tenant_id, user_id)
            .await
        {
            Ok(m) if m.is_active() => Ok(Some(m)),
            Ok(_) | Err(BastionError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn check_member(
        &self,
        membership: &Membership,
        requested: &PermissionKey,
    ) -> BastionResult<bool> {
        let allowed = match self.matching {
            PermissionMatching::Exact => {
                self.permission_repo
                    .member_has_permission(membership.tenant_id, &membership.user_id, requested)
                    .await?
            }
            PermissionMatching::Wildcard => self
                .permission_repo
                .resolve_for_member(membership.tenant_id, &membership.user_id)
                .await?
                .iter()
                .any(|granted| granted.matches(requested)),
        };

        debug!(
            tenant_id = %membership.tenant_id,
            user_id = %membership.user_id,
            permission = %requested,
            allowed,
            "authorization decision"
        );
        Ok(allowed)
    }
}
