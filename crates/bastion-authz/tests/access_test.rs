//! Integration tests for permission resolution, the tenant access gate
//! and RBAC administration, backed by in-memory SurrealDB.

use bastion_authz::config::{AuthorizationConfig, PermissionMatching};
use bastion_authz::{
    Actor, MembershipService, PermissionEngine, RbacService, TenantAccess, TenantAccessGate,
};
use bastion_core::error::BastionError;
use bastion_core::models::membership::MembershipStatus;
use bastion_core::models::permission::CreatePermission;
use bastion_core::models::policy::{CreatePolicy, UpdatePolicy};
use bastion_core::models::role::{CreateRole, RoleType};
use bastion_core::models::tenant::CreateTenant;
use bastion_core::repository::{Pagination, TenantRepository};
use bastion_db::repository::{
    SurrealMembershipRepository, SurrealPermissionRepository, SurrealPlatformAdminRepository,
    SurrealPolicyRepository, SurrealRoleRepository, SurrealTenantRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

type Rbac = RbacService<
    SurrealPermissionRepository<Db>,
    SurrealPolicyRepository<Db>,
    SurrealRoleRepository<Db>,
    SurrealMembershipRepository<Db>,
>;
type Engine = PermissionEngine<
    SurrealPermissionRepository<Db>,
    SurrealMembershipRepository<Db>,
    SurrealPlatformAdminRepository<Db>,
>;
type Gate = TenantAccessGate<SurrealMembershipRepository<Db>, SurrealPlatformAdminRepository<Db>>;
type Members = MembershipService<
    SurrealMembershipRepository<Db>,
    SurrealRoleRepository<Db>,
    SurrealTenantRepository<Db>,
>;

struct Fixture {
    db: Surreal<Db>,
    rbac: Rbac,
    engine: Engine,
    gate: Gate,
    members: Members,
    tenant_id: Uuid,
    role_id: Uuid,
    policy_id: Uuid,
    root: Actor,
}

fn engine(db: &Surreal<Db>, matching: PermissionMatching) -> Engine {
    PermissionEngine::new(
        SurrealPermissionRepository::new(db.clone()),
        SurrealMembershipRepository::new(db.clone()),
        SurrealPlatformAdminRepository::new(db.clone()),
        &AuthorizationConfig { matching },
    )
}

/// Helper: in-memory DB with system roles, one active tenant, and an
/// "Accountant" role granting `billing:invoice:read` held by bob.
async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    bastion_db::run_migrations(&db).await.unwrap();

    let rbac = RbacService::new(
        SurrealPermissionRepository::new(db.clone()),
        SurrealPolicyRepository::new(db.clone()),
        SurrealRoleRepository::new(db.clone()),
        SurrealMembershipRepository::new(db.clone()),
    );
    rbac.bootstrap_system_roles().await.unwrap();

    let tenants = SurrealTenantRepository::new(db.clone());
    let tenant = tenants
        .create(CreateTenant {
            name: "Acme".into(),
            slug: "acme-corp".into(),
            metadata: None,
            created_by: "alice".into(),
            owner_role_id: None,
        })
        .await
        .unwrap();
    tenants.activate_if_pending(tenant.id).await.unwrap();

    let root = Actor::platform_admin("root");
    let alice = Actor::tenant_user("alice", tenant.id);

    let read = rbac
        .create_permission(CreatePermission {
            service: "billing".into(),
            entity: "invoice".into(),
            action: "read".into(),
            description: "Read invoices".into(),
        })
        .await
        .unwrap();
    let policy = rbac
        .create_policy(
            &alice,
            CreatePolicy {
                name: "Invoice readers".into(),
                description: String::new(),
                tenant_id: Some(tenant.id),
            },
        )
        .await
        .unwrap();
    rbac.assign_permissions_to_policy(&alice, policy.id, &[read.id])
        .await
        .unwrap();
    let role = rbac
        .create_role(
            &alice,
            CreateRole {
                name: "Accountant".into(),
                role_type: RoleType::Tenant,
                description: String::new(),
                tenant_id: Some(tenant.id),
            },
        )
        .await
        .unwrap();
    rbac.assign_policies_to_role(&alice, role.id, &[policy.id])
        .await
        .unwrap();

    let members = MembershipService::new(
        SurrealMembershipRepository::new(db.clone()),
        SurrealRoleRepository::new(db.clone()),
        tenants,
    );
    members
        .add_member(tenant.id, "bob", role.id, Some("alice"))
        .await
        .unwrap();

    Fixture {
        engine: engine(&db, PermissionMatching::Exact),
        gate: TenantAccessGate::new(
            SurrealMembershipRepository::new(db.clone()),
            SurrealPlatformAdminRepository::new(db.clone()),
        ),
        db,
        rbac,
        members,
        tenant_id: tenant.id,
        role_id: role.id,
        policy_id: policy.id,
        root,
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn member_is_authorized_for_granted_permission() {
    let f = setup().await;
    assert!(
        f.engine
            .authorize(f.tenant_id, "bob", "billing", "invoice", "read")
            .await
            .unwrap()
    );
    assert!(
        !f.engine
            .authorize(f.tenant_id, "bob", "billing", "invoice", "write")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn removing_role_policy_link_denies() {
    let f = setup().await;
    let alice = Actor::tenant_user("alice", f.tenant_id);

    f.rbac
        .revoke_policy_from_role(&alice, f.role_id, f.policy_id)
        .await
        .unwrap();

    assert!(
        !f.engine
            .authorize(f.tenant_id, "bob", "billing", "invoice", "read")
            .await
            .unwrap()
    );
    let catalog = f.rbac.list_permissions_by_service("billing").await.unwrap();
    assert_eq!(catalog.len(), 1, "permission itself is untouched");
}

#[tokio::test]
async fn default_deny_without_membership() {
    let f = setup().await;
    for (service, entity, action) in [
        ("billing", "invoice", "read"),
        ("billing", "invoice", "write"),
        ("crm", "contact", "read"),
    ] {
        assert!(
            !f.engine
                .authorize(f.tenant_id, "mallory", service, entity, action)
                .await
                .unwrap()
        );
        assert!(
            !f.engine
                .authorize(Uuid::new_v4(), "bob", service, entity, action)
                .await
                .unwrap()
        );
    }
    assert!(
        f.engine
            .user_permissions(f.tenant_id, "mallory")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn inactive_member_is_denied() {
    let f = setup().await;
    f.members
        .set_status(f.tenant_id, "bob", MembershipStatus::Inactive)
        .await
        .unwrap();

    assert!(
        !f.engine
            .authorize(f.tenant_id, "bob", "billing", "invoice", "read")
            .await
            .unwrap()
    );
    assert!(matches!(
        f.gate.check("bob", &f.tenant_id.to_string()).await,
        Err(BastionError::Forbidden)
    ));
}

#[tokio::test]
async fn user_permissions_are_sorted_strings() {
    let f = setup().await;
    let alice = Actor::tenant_user("alice", f.tenant_id);
    let list = f
        .rbac
        .create_permission(CreatePermission {
            service: "billing".into(),
            entity: "invoice".into(),
            action: "list".into(),
            description: String::new(),
        })
        .await
        .unwrap();
    f.rbac
        .assign_permissions_to_policy(&alice, f.policy_id, &[list.id])
        .await
        .unwrap();

    let permissions = f.engine.user_permissions(f.tenant_id, "bob").await.unwrap();
    assert_eq!(
        permissions,
        vec!["billing:invoice:list", "billing:invoice:read"]
    );
}

#[tokio::test]
async fn malformed_permission_request_is_a_validation_error() {
    let f = setup().await;
    assert!(matches!(
        f.engine
            .authorize(f.tenant_id, "bob", "Billing", "invoice", "read")
            .await,
        Err(BastionError::Validation { .. })
    ));
}

#[tokio::test]
async fn wildcard_matching_is_opt_in() {
    let f = setup().await;
    let alice = Actor::tenant_user("alice", f.tenant_id);
    let any_billing = f
        .rbac
        .create_permission(CreatePermission {
            service: "billing".into(),
            entity: "*".into(),
            action: "*".into(),
            description: "Everything in billing".into(),
        })
        .await
        .unwrap();
    f.rbac
        .assign_permissions_to_policy(&alice, f.policy_id, &[any_billing.id])
        .await
        .unwrap();

    assert!(
        !f.engine
            .authorize(f.tenant_id, "bob", "billing", "refund", "create")
            .await
            .unwrap(),
        "exact matching ignores stored wildcards"
    );

    let wildcard = engine(&f.db, PermissionMatching::Wildcard);
    assert!(
        wildcard
            .authorize(f.tenant_id, "bob", "billing", "refund", "create")
            .await
            .unwrap()
    );
    assert!(
        !wildcard
            .authorize(f.tenant_id, "bob", "crm", "contact", "read")
            .await
            .unwrap()
    );
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gate_returns_membership_for_active_member() {
    let f = setup().await;
    let access = f.gate.check("bob", &f.tenant_id.to_string()).await.unwrap();

    assert!(!access.is_platform_admin());
    assert_eq!(access.tenant_id(), f.tenant_id);
    assert_eq!(access.membership().unwrap().role_id, f.role_id);
    assert!(
        f.engine
            .authorize_access(&access, "billing", "invoice", "read")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn gate_collapses_unknown_tenant_and_non_member() {
    let f = setup().await;

    let unknown = f.gate.check("bob", &Uuid::new_v4().to_string()).await;
    let outsider = f.gate.check("mallory", &f.tenant_id.to_string()).await;
    assert!(matches!(unknown, Err(BastionError::Forbidden)));
    assert!(matches!(outsider, Err(BastionError::Forbidden)));
}

#[tokio::test]
async fn gate_rejects_malformed_tenant_ids() {
    let f = setup().await;
    for raw in ["", "  ", "acme-corp", "1234"] {
        assert!(matches!(
            f.gate.check("bob", raw).await,
            Err(BastionError::Validation { .. })
        ));
    }
}

#[tokio::test]
async fn platform_admin_bypasses_membership_everywhere() {
    let f = setup().await;
    f.gate.grant_platform_admin("root", "bootstrap").await.unwrap();

    let never_joined = Uuid::new_v4();
    let access = f.gate.check("root", &never_joined.to_string()).await.unwrap();
    assert!(matches!(
        access,
        TenantAccess::PlatformAdmin { tenant_id, .. } if tenant_id == never_joined
    ));
    assert!(
        f.engine
            .authorize_access(&access, "crm", "contact", "delete")
            .await
            .unwrap()
    );
    assert!(
        f.engine
            .authorize(never_joined, "root", "billing", "invoice", "write")
            .await
            .unwrap()
    );

    f.gate.revoke_platform_admin("root").await.unwrap();
    assert!(matches!(
        f.gate.check("root", &never_joined.to_string()).await,
        Err(BastionError::Forbidden)
    ));
}

#[tokio::test]
async fn platform_admin_administration() {
    let f = setup().await;
    f.gate.grant_platform_admin("root", "bootstrap").await.unwrap();

    assert!(matches!(
        f.gate.grant_platform_admin("root", "bootstrap").await,
        Err(BastionError::AlreadyExists { .. })
    ));
    assert!(f.gate.is_platform_admin("root").await.unwrap());
    assert!(!f.gate.is_platform_admin("bob").await.unwrap());
    assert_eq!(
        f.gate
            .list_platform_admins(Pagination::default())
            .await
            .unwrap()
            .total,
        1
    );
    assert!(matches!(
        f.gate.revoke_platform_admin("bob").await,
        Err(BastionError::NotFound { .. })
    ));
}

// ---------------------------------------------------------------------------
// RBAC administration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bootstrap_is_idempotent() {
    let f = setup().await;
    let again = f.rbac.bootstrap_system_roles().await.unwrap();
    let names: Vec<&str> = again.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Admin", "Writer", "Viewer", "Basic"]);
    assert!(again.iter().all(|r| r.is_system && r.tenant_id.is_none()));

    let global = f.rbac.list_roles(None, Pagination::default()).await.unwrap();
    assert_eq!(global.total, 4);
}

#[tokio::test]
async fn system_roles_cannot_be_deleted() {
    let f = setup().await;
    let viewer = f.rbac.get_role_by_name(None, "Viewer").await.unwrap();

    assert!(matches!(
        f.rbac.delete_role(&f.root, viewer.id).await,
        Err(BastionError::Forbidden)
    ));
    assert!(f.rbac.get_role(viewer.id).await.is_ok());
}

#[tokio::test]
async fn global_policies_are_reserved_for_platform_admins() {
    let f = setup().await;
    let alice = Actor::tenant_user("alice", f.tenant_id);
    let input = CreatePolicy {
        name: "Global readers".into(),
        description: String::new(),
        tenant_id: None,
    };

    assert!(matches!(
        f.rbac.create_policy(&alice, input.clone()).await,
        Err(BastionError::Forbidden)
    ));
    let policy = f.rbac.create_policy(&f.root, input).await.unwrap();
    assert!(policy.is_system);

    let rename = UpdatePolicy {
        name: Some("Renamed".into()),
        description: None,
    };
    assert!(matches!(
        f.rbac.update_policy(&alice, policy.id, rename.clone()).await,
        Err(BastionError::Forbidden)
    ));
    assert!(matches!(
        f.rbac.delete_policy(&alice, policy.id).await,
        Err(BastionError::Forbidden)
    ));
    let renamed = f.rbac.update_policy(&f.root, policy.id, rename).await.unwrap();
    assert_eq!(renamed.name, "Renamed");
}

#[tokio::test]
async fn role_in_use_cannot_be_deleted() {
    let f = setup().await;
    let alice = Actor::tenant_user("alice", f.tenant_id);

    assert!(matches!(
        f.rbac.delete_role(&alice, f.role_id).await,
        Err(BastionError::Conflict { .. })
    ));

    f.members.remove_member(f.tenant_id, "bob").await.unwrap();
    f.rbac.delete_role(&alice, f.role_id).await.unwrap();
}

#[tokio::test]
async fn duplicates_are_rejected() {
    let f = setup().await;
    let alice = Actor::tenant_user("alice", f.tenant_id);

    assert!(matches!(
        f.rbac
            .create_permission(CreatePermission {
                service: "billing".into(),
                entity: "invoice".into(),
                action: "read".into(),
                description: String::new(),
            })
            .await,
        Err(BastionError::AlreadyExists { .. })
    ));
    assert!(matches!(
        f.rbac
            .create_role(
                &alice,
                CreateRole {
                    name: "Accountant".into(),
                    role_type: RoleType::Tenant,
                    description: String::new(),
                    tenant_id: Some(f.tenant_id),
                },
            )
            .await,
        Err(BastionError::AlreadyExists { .. })
    ));
}

#[tokio::test]
async fn assignment_checks_every_id_first() {
    let f = setup().await;
    let alice = Actor::tenant_user("alice", f.tenant_id);
    let write = f
        .rbac
        .create_permission(CreatePermission {
            service: "billing".into(),
            entity: "invoice".into(),
            action: "write".into(),
            description: String::new(),
        })
        .await
        .unwrap();

    let result = f
        .rbac
        .assign_permissions_to_policy(&alice, f.policy_id, &[write.id, Uuid::new_v4()])
        .await;
    assert!(matches!(result, Err(BastionError::NotFound { .. })));
    assert_eq!(f.rbac.policy_permissions(f.policy_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn tenant_policies_do_not_cross_tenants() {
    let f = setup().await;
    let elsewhere = Uuid::new_v4();
    let outsider = Actor::tenant_user("mallory", elsewhere);
    let other_role = f
        .rbac
        .create_role(
            &outsider,
            CreateRole {
                name: "Intruder".into(),
                role_type: RoleType::Tenant,
                description: String::new(),
                tenant_id: Some(elsewhere),
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        f.rbac
            .assign_policies_to_role(&f.root, other_role.id, &[f.policy_id])
            .await,
        Err(BastionError::Validation { .. })
    ));
}

#[tokio::test]
async fn tenant_actor_cannot_edit_another_tenants_entities() {
    let f = setup().await;
    let mallory = Actor::tenant_user("mallory", Uuid::new_v4());

    assert!(matches!(
        f.rbac
            .update_policy(
                &mallory,
                f.policy_id,
                UpdatePolicy {
                    name: Some("Hijacked".into()),
                    description: None,
                },
            )
            .await,
        Err(BastionError::Forbidden)
    ));
    assert!(matches!(
        f.rbac.delete_policy(&mallory, f.policy_id).await,
        Err(BastionError::Forbidden)
    ));
    assert!(matches!(
        f.rbac
            .revoke_policy_from_role(&mallory, f.role_id, f.policy_id)
            .await,
        Err(BastionError::Forbidden)
    ));
    assert!(matches!(
        f.rbac
            .create_role(
                &mallory,
                CreateRole {
                    name: "Backdoor".into(),
                    role_type: RoleType::Tenant,
                    description: String::new(),
                    tenant_id: Some(f.tenant_id),
                },
            )
            .await,
        Err(BastionError::Forbidden)
    ));

    // Nothing changed; bob keeps the grant.
    assert_eq!(f.rbac.get_policy(f.policy_id).await.unwrap().name, "Invoice readers");
    assert!(
        f.engine
            .authorize(f.tenant_id, "bob", "billing", "invoice", "read")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn actor_from_gate_is_bound_to_checked_tenant() {
    let f = setup().await;
    let access = f.gate.check("bob", &f.tenant_id.to_string()).await.unwrap();
    let bob = Actor::from(&access);
    assert_eq!(bob.tenant_id, Some(f.tenant_id));

    let renamed = f
        .rbac
        .update_policy(
            &bob,
            f.policy_id,
            UpdatePolicy {
                name: None,
                description: Some("Read-only invoices".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.description, "Read-only invoices");
}

#[tokio::test]
async fn membership_changes_role_in_place() {
    let f = setup().await;
    let viewer = f.rbac.get_role_by_name(Some(f.tenant_id), "Viewer").await.unwrap();

    let before = f.members.get_member(f.tenant_id, "bob").await.unwrap();
    let after = f
        .members
        .change_role(f.tenant_id, "bob", viewer.id)
        .await
        .unwrap();

    assert_eq!(before.id, after.id);
    assert_eq!(after.role_id, viewer.id);
    assert_eq!(f.members.user_memberships("bob").await.unwrap().len(), 1);
    assert!(
        !f.engine
            .authorize(f.tenant_id, "bob", "billing", "invoice", "read")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn adding_an_existing_member_is_rejected() {
    let f = setup().await;
    let viewer = f.rbac.get_role_by_name(None, "Viewer").await.unwrap();
    assert!(matches!(
        f.members
            .add_member(f.tenant_id, "bob", viewer.id, None)
            .await,
        Err(BastionError::Conflict { .. })
    ));
}
