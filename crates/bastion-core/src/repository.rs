//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Writes that must land together
//! (invitation acceptance with its membership, credential rotation,
//! tenant creation with its owner) are single repository calls so that
//! implementations can run them in one transaction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BastionResult;
use crate::models::{
    invitation::{CreateInvitation, Invitation, InvitationStatus},
    membership::{CreateMembership, Membership, UpdateMembership},
    permission::{CreatePermission, Permission, PermissionKey, UpdatePermission},
    platform_admin::{CreatePlatformAdmin, PlatformAdmin},
    policy::{CreatePolicy, Policy, UpdatePolicy},
    role::{CreateRole, Role, UpdateRole},
    system_user::{CreateSystemUser, SystemUser},
    tenant::{CreateTenant, Tenant, TenantStatus, UpdateTenant},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Permission catalog, policies and roles
// ---------------------------------------------------------------------------

pub trait PermissionRepository: Send + Sync {
    fn create(&self, input: CreatePermission)
    -> impl Future<Output = BastionResult<Permission>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = BastionResult<Permission>> + Send;
    fn get_by_key(
        &self,
        key: &PermissionKey,
    ) -> impl Future<Output = BastionResult<Permission>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdatePermission,
    ) -> impl Future<Output = BastionResult<Permission>> + Send;
    /// Deletes the permission and every policy link pointing at it.
    fn delete(&self, id: Uuid) -> impl Future<Output = BastionResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<Permission>>> + Send;
    fn list_by_service(
        &self,
        service: &str,
    ) -> impl Future<Output = BastionResult<Vec<Permission>>> + Send;
    /// Number of policies that currently include the permission.
    fn count_policy_references(&self, id: Uuid) -> impl Future<Output = BastionResult<u64>> + Send;

    /// Resolve every permission reachable from the user's active
    /// membership in the tenant, in one read.
    fn resolve_for_member(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> impl Future<Output = BastionResult<Vec<PermissionKey>>> + Send;
    /// Exact-match check over the same traversal as
    /// [`resolve_for_member`](Self::resolve_for_member).
    fn member_has_permission(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        key: &PermissionKey,
    ) -> impl Future<Output = BastionResult<bool>> + Send;
}

pub trait PolicyRepository: Send + Sync {
    fn create(&self, input: CreatePolicy) -> impl Future<Output = BastionResult<Policy>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = BastionResult<Policy>> + Send;
    /// Looks up a policy by name within exactly one scope (`None` = global).
    fn get_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> impl Future<Output = BastionResult<Policy>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdatePolicy,
    ) -> impl Future<Output = BastionResult<Policy>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = BastionResult<()>> + Send;
    /// Lists the tenant's policies together with the global ones. `None`
    /// lists only global policies.
    fn list(
        &self,
        tenant_id: Option<Uuid>,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<Policy>>> + Send;
    /// Idempotent: linking an already linked permission is a no-op.
    fn add_permission(
        &self,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = BastionResult<()>> + Send;
    fn remove_permission(
        &self,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = BastionResult<()>> + Send;
    fn get_permissions(
        &self,
        policy_id: Uuid,
    ) -> impl Future<Output = BastionResult<Vec<Permission>>> + Send;
}

pub trait RoleRepository: Send + Sync {
    /// `is_system` is set when the role is global.
    fn create(&self, input: CreateRole) -> impl Future<Output = BastionResult<Role>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = BastionResult<Role>> + Send;
    fn get_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> impl Future<Output = BastionResult<Role>> + Send;
    fn update(&self, id: Uuid, input: UpdateRole)
    -> impl Future<Output = BastionResult<Role>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = BastionResult<()>> + Send;
    fn list(
        &self,
        tenant_id: Option<Uuid>,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<Role>>> + Send;
    /// Idempotent: linking an already linked policy is a no-op.
    fn add_policy(
        &self,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> impl Future<Output = BastionResult<()>> + Send;
    fn remove_policy(
        &self,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> impl Future<Output = BastionResult<()>> + Send;
    fn get_policies(&self, role_id: Uuid)
    -> impl Future<Output = BastionResult<Vec<Policy>>> + Send;
}

// ---------------------------------------------------------------------------
// Memberships and platform admins
// ---------------------------------------------------------------------------

pub trait MembershipRepository: Send + Sync {
    fn create(
        &self,
        input: CreateMembership,
    ) -> impl Future<Output = BastionResult<Membership>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = BastionResult<Membership>> + Send;
    fn get_by_tenant_and_user(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> impl Future<Output = BastionResult<Membership>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateMembership,
    ) -> impl Future<Output = BastionResult<Membership>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = BastionResult<()>> + Send;
    fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<Membership>>> + Send;
    fn list_by_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = BastionResult<Vec<Membership>>> + Send;
    fn count_by_role(&self, role_id: Uuid) -> impl Future<Output = BastionResult<u64>> + Send;
}

pub trait PlatformAdminRepository: Send + Sync {
    fn create(
        &self,
        input: CreatePlatformAdmin,
    ) -> impl Future<Output = BastionResult<PlatformAdmin>> + Send;
    fn get_by_user_id(
        &self,
        user_id: &str,
    ) -> impl Future<Output = BastionResult<PlatformAdmin>> + Send;
    fn delete(&self, user_id: &str) -> impl Future<Output = BastionResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<PlatformAdmin>>> + Send;
}

// ---------------------------------------------------------------------------
// Tenants
// ---------------------------------------------------------------------------

pub trait TenantRepository: Send + Sync {
    /// Inserts the tenant as `pending`, plus the owner membership when
    /// `owner_role_id` is set, atomically.
    fn create(&self, input: CreateTenant) -> impl Future<Output = BastionResult<Tenant>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = BastionResult<Tenant>> + Send;
    fn get_by_slug(&self, slug: &str) -> impl Future<Output = BastionResult<Tenant>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateTenant,
    ) -> impl Future<Output = BastionResult<Tenant>> + Send;
    fn set_status(
        &self,
        id: Uuid,
        status: TenantStatus,
    ) -> impl Future<Output = BastionResult<Tenant>> + Send;
    /// Compare-and-set `pending -> active`. Returns `false` when the
    /// tenant was not pending.
    fn activate_if_pending(&self, id: Uuid) -> impl Future<Output = BastionResult<bool>> + Send;
    fn soft_delete(&self, id: Uuid) -> impl Future<Output = BastionResult<Tenant>> + Send;
    /// Removes the tenant row and everything scoped to it.
    fn purge(&self, id: Uuid) -> impl Future<Output = BastionResult<()>> + Send;
    /// Lists tenants that are not deleted.
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<Tenant>>> + Send;
    /// Tenants in which the user holds an active membership.
    fn list_for_user(&self, user_id: &str)
    -> impl Future<Output = BastionResult<Vec<Tenant>>> + Send;

    /// Downstream services already initialized for the tenant.
    fn completed_init_services(
        &self,
        tenant_id: Uuid,
    ) -> impl Future<Output = BastionResult<Vec<String>>> + Send;
    fn record_init_service(
        &self,
        tenant_id: Uuid,
        service: &str,
    ) -> impl Future<Output = BastionResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// Invitations
// ---------------------------------------------------------------------------

pub trait InvitationRepository: Send + Sync {
    /// Marks stale pending invitations for the same `(tenant, email)` as
    /// expired, then inserts the new one unless a live pending invitation
    /// remains. Both steps run in one transaction.
    fn create(
        &self,
        input: CreateInvitation,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<Invitation>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = BastionResult<Invitation>> + Send;
    fn get_by_token_hash(
        &self,
        token_hash: &str,
    ) -> impl Future<Output = BastionResult<Invitation>> + Send;
    fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        status: Option<InvitationStatus>,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<Invitation>>> + Send;
    fn list_pending_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = BastionResult<Vec<Invitation>>> + Send;
    /// `pending -> cancelled`.
    fn cancel(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<Invitation>> + Send;
    /// `pending -> expired` for a row whose deadline has passed.
    fn mark_expired(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<()>> + Send;
    /// `pending -> accepted` together with the membership insert. Fails
    /// as a whole if either write fails.
    fn accept(
        &self,
        id: Uuid,
        membership: CreateMembership,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<(Invitation, Membership)>> + Send;
}

// ---------------------------------------------------------------------------
// System users
// ---------------------------------------------------------------------------

pub trait SystemUserRepository: Send + Sync {
    /// Inserts the first generation of an application as primary.
    fn create(
        &self,
        input: CreateSystemUser,
    ) -> impl Future<Output = BastionResult<SystemUser>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = BastionResult<SystemUser>> + Send;
    fn get_by_email(&self, email: &str)
    -> impl Future<Output = BastionResult<SystemUser>> + Send;
    fn get_primary(
        &self,
        application_name: &str,
    ) -> impl Future<Output = BastionResult<SystemUser>> + Send;
    fn list(
        &self,
        active_only: bool,
        pagination: Pagination,
    ) -> impl Future<Output = BastionResult<PaginatedResult<SystemUser>>> + Send;
    /// All generations of an application, newest first.
    fn list_by_application(
        &self,
        application_name: &str,
    ) -> impl Future<Output = BastionResult<Vec<SystemUser>>> + Send;
    fn count_by_application(
        &self,
        application_name: &str,
    ) -> impl Future<Output = BastionResult<u64>> + Send;
    /// Demotes the current primary (keeping it active until
    /// `old_expires_at`) and inserts `next` as the new primary, atomically.
    fn rotate(
        &self,
        application_name: &str,
        next: CreateSystemUser,
        old_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<SystemUser>> + Send;
    /// Deactivates the current primary and inserts `next` as the new
    /// primary, atomically.
    fn regenerate(
        &self,
        application_name: &str,
        next: CreateSystemUser,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<SystemUser>> + Send;
    /// Ends the grace period of every non-primary active generation.
    /// Returns the number of rows revoked.
    fn revoke_non_primary(
        &self,
        application_name: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<u64>> + Send;
    fn deactivate(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<SystemUser>> + Send;
    /// Flips `is_active = false` on every active row whose `expires_at`
    /// has passed. Returns the number of rows flipped.
    fn deactivate_expired(&self, now: DateTime<Utc>)
    -> impl Future<Output = BastionResult<u64>> + Send;
    fn record_last_used(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = BastionResult<()>> + Send;
}
