//! RBAC administration — the permission catalog, policies, roles and the
//! links between them.
//!
//! Global policies and roles (`tenant_id = None`) are system entities:
//! only platform admins may create, edit or delete them, and the
//! built-in roles can never be deleted at all.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::permission::{
    CreatePermission, Permission, PermissionKey, UpdatePermission,
};
use bastion_core::models::policy::{CreatePolicy, Policy, UpdatePolicy};
use bastion_core::models::role::{CreateRole, Role, RoleType, SYSTEM_ROLES, UpdateRole};
use bastion_core::repository::{
    MembershipRepository, PaginatedResult, Pagination, PermissionRepository, PolicyRepository,
    RoleRepository,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuthzError;
use crate::gate::TenantAccess;

const MAX_NAME_LEN: usize = 100;

/// Who is performing an administrative change.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub is_platform_admin: bool,
    /// The tenant the actor is acting in. Non-admins may only change
    /// entities scoped to this tenant.
    pub tenant_id: Option<Uuid>,
}

impl Actor {
    pub fn platform_admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_platform_admin: true,
            tenant_id: None,
        }
    }

    pub fn tenant_user(user_id: impl Into<String>, tenant_id: Uuid) -> Self {
        Self {
            user_id: user_id.into(),
            is_platform_admin: false,
            tenant_id: Some(tenant_id),
        }
    }
}

impl From<&TenantAccess> for Actor {
    fn from(access: &TenantAccess) -> Self {
        Self {
            user_id: access.user_id().to_string(),
            is_platform_admin: access.is_platform_admin(),
            tenant_id: Some(access.tenant_id()),
        }
    }
}

fn validate_name(kind: &str, name: &str) -> BastionResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BastionError::validation(format!("{kind} name must not be empty")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(BastionError::validation(format!(
            "{kind} name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Global entities may only be touched by platform admins, and other
/// actors only reach entities of their own tenant.
fn require_scope_access(
    actor: &Actor,
    entity: &'static str,
    name: &str,
    scope: Option<Uuid>,
    is_system: bool,
) -> BastionResult<()> {
    if actor.is_platform_admin {
        return Ok(());
    }
    if is_system {
        warn!(user_id = %actor.user_id, entity, name, "system entity change refused");
        return Err(AuthzError::SystemEntityImmutable {
            entity,
            name: name.to_string(),
        }
        .into());
    }
    if scope.is_some() && scope != actor.tenant_id {
        warn!(
            user_id = %actor.user_id,
            actor_tenant = ?actor.tenant_id,
            entity_tenant = ?scope,
            entity,
            name,
            "cross-tenant change refused"
        );
        return Err(AuthzError::AccessDenied.into());
    }
    Ok(())
}

pub struct RbacService<P, Po, R, M>
where
    P: PermissionRepository,
    Po: PolicyRepository,
    R: RoleRepository,
    M: MembershipRepository,
{
    permission_repo: P,
    policy_repo: Po,
    role_repo: R,
    membership_repo: M,
}

impl<P, Po, R, M> RbacService<P, Po, R, M>
where
    P: PermissionRepository,
    Po: PolicyRepository,
    R: RoleRepository,
    M: MembershipRepository,
{
    pub fn new(permission_repo: P, policy_repo: Po, role_repo: R, membership_repo: M) -> Self {
        Self {
            permission_repo,
            policy_repo,
            role_repo,
            membership_repo,
        }
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    pub async fn create_permission(&self, input: CreatePermission) -> BastionResult<Permission> {
        let key = PermissionKey::new(
            input.service.trim(),
            input.entity.trim(),
            input.action.trim(),
        )?;

        match self.permission_repo.get_by_key(&key).await {
            Ok(_) => {
                return Err(BastionError::AlreadyExists {
                    entity: format!("permission {key}"),
                });
            }
            Err(BastionError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let permission = self
            .permission_repo
            .create(CreatePermission {
                service: key.service,
                entity: key.entity,
                action: key.action,
                description: input.description.trim().to_string(),
            })
            .await?;
        info!(permission = %permission.key(), "permission created");
        Ok(permission)
    }

    pub async fn get_permission(&self, id: Uuid) -> BastionResult<Permission> {
        self.permission_repo.get_by_id(id).await
    }

    pub async fn list_permissions(
        &self,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Permission>> {
        self.permission_repo.list(pagination).await
    }

    pub async fn list_permissions_by_service(
        &self,
        service: &str,
    ) -> BastionResult<Vec<Permission>> {
        self.permission_repo.list_by_service(service.trim()).await
    }

    pub async fn update_permission(
        &self,
        id: Uuid,
        input: UpdatePermission,
    ) -> BastionResult<Permission> {
        self.permission_repo
            .update(
                id,
                UpdatePermission {
                    description: input.description.map(|d| d.trim().to_string()),
                },
            )
            .await
    }

    /// Deletes the permission and detaches it from every policy.
    pub async fn delete_permission(&self, id: Uuid) -> BastionResult<()> {
        let permission = self.permission_repo.get_by_id(id).await?;
        let references = self.permission_repo.count_policy_references(id).await?;
        if references > 0 {
            warn!(
                permission = %permission.key(),
                references,
                "deleting a permission that is still referenced by policies"
            );
        }
        self.permission_repo.delete(id).await?;
        info!(permission = %permission.key(), "permission deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Policies
    // -----------------------------------------------------------------------

    pub async fn create_policy(&self, actor: &Actor, input: CreatePolicy) -> BastionResult<Policy> {
        let name = validate_name("policy", &input.name)?;
        require_scope_access(
            actor,
            "policy",
            &name,
            input.tenant_id,
            input.tenant_id.is_none(),
        )?;
        self.ensure_policy_name_free(input.tenant_id, &name).await?;

        let policy = self
            .policy_repo
            .create(CreatePolicy {
                name,
                description: input.description.trim().to_string(),
                tenant_id: input.tenant_id,
            })
            .await?;
        info!(policy_id = %policy.id, tenant_id = ?policy.tenant_id, "policy created");
        Ok(policy)
    }

    pub async fn get_policy(&self, id: Uuid) -> BastionResult<Policy> {
        self.policy_repo.get_by_id(id).await
    }

    /// The tenant's policies plus the global ones.
    pub async fn list_policies(
        &self,
        tenant_id: Option<Uuid>,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Policy>> {
        self.policy_repo.list(tenant_id, pagination).await
    }

    pub async fn update_policy(
        &self,
        actor: &Actor,
        id: Uuid,
        input: UpdatePolicy,
    ) -> BastionResult<Policy> {
        let policy = self.policy_repo.get_by_id(id).await?;
        require_scope_access(actor, "policy", &policy.name, policy.tenant_id, policy.is_system)?;

        let name = match input.name {
            Some(name) => {
                let name = validate_name("policy", &name)?;
                if name != policy.name {
                    self.ensure_policy_name_free(policy.tenant_id, &name).await?;
                }
                Some(name)
            }
            None => None,
        };

        self.policy_repo
            .update(
                id,
                UpdatePolicy {
                    name,
                    description: input.description.map(|d| d.trim().to_string()),
                },
            )
            .await
    }

    pub async fn delete_policy(&self, actor: &Actor, id: Uuid) -> BastionResult<()> {
        let policy = self.policy_repo.get_by_id(id).await?;
        require_scope_access(actor, "policy", &policy.name, policy.tenant_id, policy.is_system)?;
        self.policy_repo.delete(id).await?;
        info!(policy_id = %id, "policy deleted");
        Ok(())
    }

    async fn ensure_policy_name_free(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> BastionResult<()> {
        match self.policy_repo.get_by_name(tenant_id, name).await {
            Ok(_) => Err(BastionError::AlreadyExists {
                entity: format!("policy '{name}'"),
            }),
            Err(BastionError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Roles
    // -----------------------------------------------------------------------

    pub async fn create_role(&self, actor: &Actor, input: CreateRole) -> BastionResult<Role> {
        let name = validate_name("role", &input.name)?;
        require_scope_access(actor, "role", &name, input.tenant_id, input.tenant_id.is_none())?;
        if input.role_type == RoleType::Platform && input.tenant_id.is_some() {
            return Err(BastionError::validation(
                "platform roles cannot be scoped to a tenant",
            ));
        }
        self.ensure_role_name_free(input.tenant_id, &name).await?;

        let role = self
            .role_repo
            .create(CreateRole {
                name,
                role_type: input.role_type,
                description: input.description.trim().to_string(),
                tenant_id: input.tenant_id,
            })
            .await?;
        info!(role_id = %role.id, tenant_id = ?role.tenant_id, "role created");
        Ok(role)
    }

    pub async fn get_role(&self, id: Uuid) -> BastionResult<Role> {
        self.role_repo.get_by_id(id).await
    }

    /// Looks the name up in the tenant first, then among global roles.
    pub async fn get_role_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> BastionResult<Role> {
        if tenant_id.is_some() {
            match self.role_repo.get_by_name(tenant_id, name).await {
                Ok(role) => return Ok(role),
                Err(BastionError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.role_repo.get_by_name(None, name).await
    }

    pub async fn list_roles(
        &self,
        tenant_id: Option<Uuid>,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Role>> {
        self.role_repo.list(tenant_id, pagination).await
    }

    pub async fn update_role(
        &self,
        actor: &Actor,
        id: Uuid,
        input: UpdateRole,
    ) -> BastionResult<Role> {
        let role = self.role_repo.get_by_id(id).await?;
        require_scope_access(actor, "role", &role.name, role.tenant_id, role.is_system)?;

        let name = match input.name {
            Some(name) => {
                let name = validate_name("role", &name)?;
                if name != role.name {
                    if SYSTEM_ROLES.contains(&role.name.as_str()) && role.tenant_id.is_none() {
                        return Err(AuthzError::SystemEntityImmutable {
                            entity: "role",
                            name: role.name,
                        }
                        .into());
                    }
                    self.ensure_role_name_free(role.tenant_id, &name).await?;
                }
                Some(name)
            }
            None => None,
        };

        self.role_repo
            .update(
                id,
                UpdateRole {
                    name,
                    description: input.description.map(|d| d.trim().to_string()),
                },
            )
            .await
    }

    /// Built-in roles are never deletable, and a role still held by a
    /// membership must be reassigned first.
    pub async fn delete_role(&self, actor: &Actor, id: Uuid) -> BastionResult<()> {
        let role = self.role_repo.get_by_id(id).await?;
        if role.tenant_id.is_none() && SYSTEM_ROLES.contains(&role.name.as_str()) {
            return Err(AuthzError::SystemEntityImmutable {
                entity: "role",
                name: role.name,
            }
            .into());
        }
        require_scope_access(actor, "role", &role.name, role.tenant_id, role.is_system)?;

        let holders = self.membership_repo.count_by_role(id).await?;
        if holders > 0 {
            return Err(BastionError::conflict(format!(
                "role '{}' is still assigned to {holders} membership(s)",
                role.name
            )));
        }

        self.role_repo.delete(id).await?;
        info!(role_id = %id, "role deleted");
        Ok(())
    }

    async fn ensure_role_name_free(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> BastionResult<()> {
        match self.role_repo.get_by_name(tenant_id, name).await {
            Ok(_) => Err(BastionError::AlreadyExists {
                entity: format!("role '{name}'"),
            }),
            Err(BastionError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Idempotently create the built-in global roles.
    pub async fn bootstrap_system_roles(&self) -> BastionResult<Vec<Role>> {
        let mut roles = Vec::with_capacity(SYSTEM_ROLES.len());
        for name in SYSTEM_ROLES {
            let role = match self.role_repo.get_by_name(None, name).await {
                Ok(role) => role,
                Err(BastionError::NotFound { .. }) => {
                    let role = match self
                        .role_repo
                        .create(CreateRole {
                            name: name.to_string(),
                            role_type: RoleType::Tenant,
                            description: format!("Built-in {name} role"),
                            tenant_id: None,
                        })
                        .await
                    {
                        Ok(role) => role,
                        // Another process bootstrapped concurrently.
                        Err(BastionError::AlreadyExists { .. }) => {
                            self.role_repo.get_by_name(None, name).await?
                        }
                        Err(e) => return Err(e),
                    };
                    info!(role = name, "system role created");
                    role
                }
                Err(e) => return Err(e),
            };
            roles.push(role);
        }
        Ok(roles)
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    /// Attach permissions to a policy. Every id is checked before the
    /// first link is written; already linked permissions are skipped.
    pub async fn assign_permissions_to_policy(
        &self,
        actor: &Actor,
        policy_id: Uuid,
        permission_ids: &[Uuid],
    ) -> BastionResult<()> {
        let policy = self.policy_repo.get_by_id(policy_id).await?;
        require_scope_access(actor, "policy", &policy.name, policy.tenant_id, policy.is_system)?;
        for permission_id in permission_ids {
            self.permission_repo.get_by_id(*permission_id).await?;
        }

        for permission_id in permission_ids {
            self.policy_repo
                .add_permission(policy_id, *permission_id)
                .await?;
        }
        info!(%policy_id, count = permission_ids.len(), "permissions assigned to policy");
        Ok(())
    }

    pub async fn revoke_permission_from_policy(
        &self,
        actor: &Actor,
        policy_id: Uuid,
        permission_id: Uuid,
    ) -> BastionResult<()> {
        let policy = self.policy_repo.get_by_id(policy_id).await?;
        require_scope_access(actor, "policy", &policy.name, policy.tenant_id, policy.is_system)?;
        self.policy_repo
            .remove_permission(policy_id, permission_id)
            .await?;
        info!(%policy_id, %permission_id, "permission revoked from policy");
        Ok(())
    }

    pub async fn policy_permissions(&self, policy_id: Uuid) -> BastionResult<Vec<Permission>> {
        self.policy_repo.get_by_id(policy_id).await?;
        self.policy_repo.get_permissions(policy_id).await
    }

    /// Attach policies to a role. A tenant role may use global policies
    /// and its own tenant's policies; a global role only global ones.
    pub async fn assign_policies_to_role(
        &self,
        actor: &Actor,
        role_id: Uuid,
        policy_ids: &[Uuid],
    ) -> BastionResult<()> {
        let role = self.role_repo.get_by_id(role_id).await?;
        require_scope_access(actor, "role", &role.name, role.tenant_id, role.is_system)?;
        for policy_id in policy_ids {
            let policy = self.policy_repo.get_by_id(*policy_id).await?;
            let compatible = match (role.tenant_id, policy.tenant_id) {
                (_, None) => true,
                (Some(role_tenant), Some(policy_tenant)) => role_tenant == policy_tenant,
                (None, Some(_)) => false,
            };
            if !compatible {
                return Err(BastionError::validation(format!(
                    "policy '{}' belongs to another scope than role '{}'",
                    policy.name, role.name
                )));
            }
        }

        for policy_id in policy_ids {
            self.role_repo.add_policy(role_id, *policy_id).await?;
        }
        info!(%role_id, count = policy_ids.len(), "policies assigned to role");
        Ok(())
    }

    pub async fn revoke_policy_from_role(
        &self,
        actor: &Actor,
        role_id: Uuid,
        policy_id: Uuid,
    ) -> BastionResult<()> {
        let role = self.role_repo.get_by_id(role_id).await?;
        require_scope_access(actor, "role", &role.name, role.tenant_id, role.is_system)?;
        self.role_repo.remove_policy(role_id, policy_id).await?;
        info!(%role_id, %policy_id, "policy revoked from role");
        Ok(())
    }

    pub async fn role_policies(&self, role_id: Uuid) -> BastionResult<Vec<Policy>> {
        self.role_repo.get_by_id(role_id).await?;
        self.role_repo.get_policies(role_id).await
    }
}
