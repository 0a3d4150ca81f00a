//! Tenant administration.
//!
//! New tenants start `pending`. A self-service tenant is written together
//! with its creator's `Admin` membership and an initialization job is
//! queued right away. A managed tenant gets an `Admin` invitation instead
//! and is initialized once that invitation is accepted.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::role::{ADMIN_ROLE, Role};
use bastion_core::models::tenant::{
    CreateTenant, Tenant, TenantMetadata, TenantStatus, UpdateTenant,
};
use bastion_core::repository::{
    InvitationRepository, PaginatedResult, Pagination, RoleRepository, TenantRepository,
};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::InvitationConfig;
use crate::invitation::{IssuedInvitation, issue_invitation, normalize_email};
use crate::jobs::{Job, JobQueue, TenantInitJob};

const SLUG_MIN_LEN: usize = 3;
const SLUG_MAX_LEN: usize = 63;
const MAX_TENANT_NAME_LEN: usize = 255;

/// Lower-case, trim, and turn whitespace and underscores into `-`, then
/// validate.
pub fn normalize_slug(raw: &str) -> BastionResult<String> {
    let slug: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
        .collect();
    validate_slug("slug", &slug)?;
    Ok(slug)
}

/// `[a-z0-9-]`, 3 to 63 characters, no leading or trailing `-`.
pub(crate) fn validate_slug(field: &str, value: &str) -> BastionResult<()> {
    let len = value.len();
    if !(SLUG_MIN_LEN..=SLUG_MAX_LEN).contains(&len) {
        return Err(BastionError::validation(format!(
            "{field} must be between {SLUG_MIN_LEN} and {SLUG_MAX_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(BastionError::validation(format!(
            "{field} may only contain lowercase letters, digits and '-'"
        )));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(BastionError::validation(format!(
            "{field} must not start or end with '-'"
        )));
    }
    Ok(())
}

fn validate_tenant_name(name: &str) -> BastionResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BastionError::validation("tenant name must not be empty"));
    }
    if name.chars().count() > MAX_TENANT_NAME_LEN {
        return Err(BastionError::validation(format!(
            "tenant name must be at most {MAX_TENANT_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Input for creating a tenant.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub metadata: Option<TenantMetadata>,
}

/// A managed tenant and the invitation for its first admin.
#[derive(Debug)]
pub struct ManagedTenant {
    pub tenant: Tenant,
    pub admin_invitation: IssuedInvitation,
}

pub struct TenantService<T, R, I, Q>
where
    T: TenantRepository,
    R: RoleRepository,
    I: InvitationRepository,
    Q: JobQueue,
{
    tenant_repo: T,
    role_repo: R,
    invitation_repo: I,
    queue: Q,
    invitation_config: InvitationConfig,
}

impl<T, R, I, Q> TenantService<T, R, I, Q>
where
    T: TenantRepository,
    R: RoleRepository,
    I: InvitationRepository,
    Q: JobQueue,
{
    pub fn new(
        tenant_repo: T,
        role_repo: R,
        invitation_repo: I,
        queue: Q,
        invitation_config: InvitationConfig,
    ) -> Self {
        Self {
            tenant_repo,
            role_repo,
            invitation_repo,
            queue,
            invitation_config,
        }
    }

    /// Create a `pending` tenant owned by `creator_id` and queue its
    /// initialization. The returned tenant is still `pending`.
    pub async fn create_tenant(&self, input: NewTenant, creator_id: &str) -> BastionResult<Tenant> {
        let (name, slug) = self.validate_new(&input).await?;
        let admin_role = self.admin_role().await?;

        let tenant = self
            .tenant_repo
            .create(CreateTenant {
                name,
                slug,
                metadata: input.metadata,
                created_by: creator_id.to_string(),
                owner_role_id: Some(admin_role.id),
            })
            .await?;
        info!(tenant_id = %tenant.id, slug = %tenant.slug, creator_id, "tenant created");

        self.enqueue_initialization(tenant.id).await;
        Ok(tenant)
    }

    /// Create a `pending` tenant without members and invite
    /// `admin_email` as its `Admin`.
    pub async fn create_managed_tenant(
        &self,
        input: NewTenant,
        admin_email: &str,
        creator_id: &str,
    ) -> BastionResult<ManagedTenant> {
        let admin_email = normalize_email(admin_email)?;
        let (name, slug) = self.validate_new(&input).await?;
        let admin_role = self.admin_role().await?;

        let tenant = self
            .tenant_repo
            .create(CreateTenant {
                name,
                slug,
                metadata: input.metadata,
                created_by: creator_id.to_string(),
                owner_role_id: None,
            })
            .await?;

        let admin_invitation = issue_invitation(
            &self.invitation_repo,
            &self.invitation_config,
            tenant.id,
            admin_email,
            admin_role.id,
            creator_id,
            Utc::now(),
        )
        .await?;
        info!(
            tenant_id = %tenant.id,
            slug = %tenant.slug,
            creator_id,
            "managed tenant created"
        );

        Ok(ManagedTenant {
            tenant,
            admin_invitation,
        })
    }

    pub async fn get_tenant(&self, id: Uuid) -> BastionResult<Tenant> {
        self.tenant_repo.get_by_id(id).await
    }

    pub async fn get_tenant_by_slug(&self, slug: &str) -> BastionResult<Tenant> {
        let slug = normalize_slug(slug)?;
        self.tenant_repo.get_by_slug(&slug).await
    }

    /// Tenants that are not deleted.
    pub async fn list_tenants(
        &self,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Tenant>> {
        self.tenant_repo.list(pagination).await
    }

    /// Tenants in which the user holds an active membership.
    pub async fn user_tenants(&self, user_id: &str) -> BastionResult<Vec<Tenant>> {
        self.tenant_repo.list_for_user(user_id).await
    }

    pub async fn update_tenant(&self, id: Uuid, input: UpdateTenant) -> BastionResult<Tenant> {
        let tenant = self.live_tenant(id).await?;
        let name = input.name.as_deref().map(validate_tenant_name).transpose()?;
        let updated = self
            .tenant_repo
            .update(
                tenant.id,
                UpdateTenant {
                    name,
                    metadata: input.metadata,
                },
            )
            .await?;
        info!(tenant_id = %id, "tenant updated");
        Ok(updated)
    }

    pub async fn suspend_tenant(&self, id: Uuid) -> BastionResult<Tenant> {
        let tenant = self.live_tenant(id).await?;
        if tenant.status == TenantStatus::Suspended {
            return Ok(tenant);
        }
        let updated = self
            .tenant_repo
            .set_status(id, TenantStatus::Suspended)
            .await?;
        info!(tenant_id = %id, previous = ?tenant.status, "tenant suspended");
        Ok(updated)
    }

    /// Only suspended tenants can be reactivated. A tenant suspended
    /// before it was ever activated goes back to `pending` and is queued
    /// for initialization again.
    pub async fn reactivate_tenant(&self, id: Uuid) -> BastionResult<Tenant> {
        let tenant = self.live_tenant(id).await?;
        if tenant.status != TenantStatus::Suspended {
            return Err(BastionError::conflict(format!(
                "tenant is {:?}, only suspended tenants can be reactivated",
                tenant.status
            )));
        }
        if tenant.activated_at.is_none() {
            let updated = self
                .tenant_repo
                .set_status(id, TenantStatus::Pending)
                .await?;
            info!(tenant_id = %id, "tenant reactivated, awaiting initialization");
            self.enqueue_initialization(id).await;
            return Ok(updated);
        }
        let updated = self.tenant_repo.set_status(id, TenantStatus::Active).await?;
        info!(tenant_id = %id, "tenant reactivated");
        Ok(updated)
    }

    /// Soft delete: status `deleted`, `deleted_at` stamped, row kept.
    pub async fn delete_tenant(&self, id: Uuid) -> BastionResult<Tenant> {
        let tenant = self.live_tenant(id).await?;
        let deleted = self.tenant_repo.soft_delete(tenant.id).await?;
        info!(tenant_id = %id, "tenant deleted");
        Ok(deleted)
    }

    /// Hard delete of the tenant and everything scoped to it.
    pub async fn purge_tenant(&self, id: Uuid) -> BastionResult<()> {
        self.tenant_repo.get_by_id(id).await?;
        self.tenant_repo.purge(id).await?;
        warn!(tenant_id = %id, "tenant purged");
        Ok(())
    }

    /// Queue initialization again for a tenant stuck in `pending`.
    pub async fn retry_initialization(&self, id: Uuid) -> BastionResult<()> {
        let tenant = self.tenant_repo.get_by_id(id).await?;
        if tenant.status != TenantStatus::Pending {
            return Err(BastionError::conflict(format!(
                "tenant is {:?}, only pending tenants are initialized",
                tenant.status
            )));
        }
        self.queue
            .enqueue(Job::TenantInitialize(TenantInitJob { tenant_id: id }))
            .await
    }

    async fn validate_new(&self, input: &NewTenant) -> BastionResult<(String, String)> {
        let name = validate_tenant_name(&input.name)?;
        let slug = normalize_slug(&input.slug)?;
        match self.tenant_repo.get_by_slug(&slug).await {
            Ok(_) => Err(BastionError::AlreadyExists {
                entity: format!("tenant '{slug}'"),
            }),
            Err(BastionError::NotFound { .. }) => Ok((name, slug)),
            Err(e) => Err(e),
        }
    }

    async fn admin_role(&self) -> BastionResult<Role> {
        match self.role_repo.get_by_name(None, ADMIN_ROLE).await {
            Err(BastionError::NotFound { .. }) => Err(BastionError::Internal(
                "system roles have not been bootstrapped".into(),
            )),
            other => other,
        }
    }

    /// Deleted tenants behave as missing.
    async fn live_tenant(&self, id: Uuid) -> BastionResult<Tenant> {
        let tenant = self.tenant_repo.get_by_id(id).await?;
        if tenant.status == TenantStatus::Deleted {
            return Err(BastionError::not_found("tenant", id));
        }
        Ok(tenant)
    }

    async fn enqueue_initialization(&self, tenant_id: Uuid) {
        if let Err(e) = self
            .queue
            .enqueue(Job::TenantInitialize(TenantInitJob { tenant_id }))
            .await
        {
            warn!(%tenant_id, error = %e, "failed to enqueue tenant initialization");
        }
    }
}
