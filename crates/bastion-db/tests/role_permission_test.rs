//! Integration tests for the permission catalog, policies, roles and
//! permission resolution using in-memory SurrealDB.

use bastion_core::error::BastionError;
use bastion_core::models::membership::{CreateMembership, MembershipStatus, UpdateMembership};
use bastion_core::models::permission::{CreatePermission, PermissionKey};
use bastion_core::models::policy::CreatePolicy;
use bastion_core::models::role::{CreateRole, RoleType};
use bastion_core::repository::{
    MembershipRepository, Pagination, PermissionRepository, PolicyRepository, RoleRepository,
};
use bastion_db::repository::{
    SurrealMembershipRepository, SurrealPermissionRepository, SurrealPolicyRepository,
    SurrealRoleRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

struct Fixture {
    permissions: SurrealPermissionRepository<Db>,
    policies: SurrealPolicyRepository<Db>,
    roles: SurrealRoleRepository<Db>,
    memberships: SurrealMembershipRepository<Db>,
    tenant_id: Uuid,
    read_invoice: Uuid,
    write_invoice: Uuid,
    policy_id: Uuid,
    role_id: Uuid,
}

/// Helper: spin up in-memory DB, run migrations, and wire
/// `billing:invoice:{read,write}` → "Invoices" policy → "Accountant" role
/// → active membership for bob.
async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    bastion_db::run_migrations(&db).await.unwrap();

    let permissions = SurrealPermissionRepository::new(db.clone());
    let policies = SurrealPolicyRepository::new(db.clone());
    let roles = SurrealRoleRepository::new(db.clone());
    let memberships = SurrealMembershipRepository::new(db.clone());
    let tenant_id = Uuid::new_v4();

    let read_invoice = permissions
        .create(CreatePermission {
            service: "billing".into(),
            entity: "invoice".into(),
            action: "read".into(),
            description: "Read invoices".into(),
        })
        .await
        .unwrap();
    let write_invoice = permissions
        .create(CreatePermission {
            service: "billing".into(),
            entity: "invoice".into(),
            action: "write".into(),
            description: "Write invoices".into(),
        })
        .await
        .unwrap();

    let policy = policies
        .create(CreatePolicy {
            name: "Invoices".into(),
            description: "Invoice access".into(),
            tenant_id: Some(tenant_id),
        })
        .await
        .unwrap();
    policies
        .add_permission(policy.id, read_invoice.id)
        .await
        .unwrap();
    policies
        .add_permission(policy.id, write_invoice.id)
        .await
        .unwrap();

    let role = roles
        .create(CreateRole {
            name: "Accountant".into(),
            role_type: RoleType::Tenant,
            description: "Books".into(),
            tenant_id: Some(tenant_id),
        })
        .await
        .unwrap();
    roles.add_policy(role.id, policy.id).await.unwrap();

    memberships
        .create(CreateMembership {
            tenant_id,
            user_id: "bob".into(),
            role_id: role.id,
            status: MembershipStatus::Active,
            invited_by: None,
        })
        .await
        .unwrap();

    Fixture {
        permissions,
        policies,
        roles,
        memberships,
        tenant_id,
        read_invoice: read_invoice.id,
        write_invoice: write_invoice.id,
        policy_id: policy.id,
        role_id: role.id,
    }
}

fn key(s: &str) -> PermissionKey {
    s.parse().unwrap()
}

#[tokio::test]
async fn resolves_every_reachable_permission() {
    let f = setup().await;

    let resolved = f
        .permissions
        .resolve_for_member(f.tenant_id, "bob")
        .await
        .unwrap();
    assert_eq!(
        resolved,
        vec![key("billing:invoice:read"), key("billing:invoice:write")]
    );
    assert!(
        f.permissions
            .member_has_permission(f.tenant_id, "bob", &key("billing:invoice:read"))
            .await
            .unwrap()
    );
    assert!(
        !f.permissions
            .member_has_permission(f.tenant_id, "bob", &key("billing:invoice:delete"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn unlinking_policy_revokes_without_deleting_permission() {
    let f = setup().await;

    f.roles.remove_policy(f.role_id, f.policy_id).await.unwrap();

    assert!(
        !f.permissions
            .member_has_permission(f.tenant_id, "bob", &key("billing:invoice:read"))
            .await
            .unwrap()
    );
    assert!(
        f.permissions
            .resolve_for_member(f.tenant_id, "bob")
            .await
            .unwrap()
            .is_empty()
    );
    // The permission itself survives.
    let still_there = f.permissions.get_by_id(f.read_invoice).await.unwrap();
    assert_eq!(still_there.key(), key("billing:invoice:read"));
}

#[tokio::test]
async fn other_tenants_and_users_resolve_nothing() {
    let f = setup().await;

    assert!(
        f.permissions
            .resolve_for_member(Uuid::new_v4(), "bob")
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        f.permissions
            .resolve_for_member(f.tenant_id, "mallory")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn inactive_membership_resolves_nothing() {
    let f = setup().await;
    let membership = f
        .memberships
        .get_by_tenant_and_user(f.tenant_id, "bob")
        .await
        .unwrap();

    f.memberships
        .update(
            membership.id,
            UpdateMembership {
                role_id: None,
                status: Some(MembershipStatus::Inactive),
            },
        )
        .await
        .unwrap();

    assert!(
        !f.permissions
            .member_has_permission(f.tenant_id, "bob", &key("billing:invoice:read"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn links_are_idempotent() {
    let f = setup().await;

    f.policies
        .add_permission(f.policy_id, f.read_invoice)
        .await
        .unwrap();
    f.roles.add_policy(f.role_id, f.policy_id).await.unwrap();

    assert_eq!(f.policies.get_permissions(f.policy_id).await.unwrap().len(), 2);
    assert_eq!(f.roles.get_policies(f.role_id).await.unwrap().len(), 1);
    assert_eq!(
        f.permissions
            .count_policy_references(f.read_invoice)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn deleting_permission_removes_its_links() {
    let f = setup().await;

    f.permissions.delete(f.write_invoice).await.unwrap();

    let remaining = f.policies.get_permissions(f.policy_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, f.read_invoice);
    assert!(matches!(
        f.permissions.get_by_id(f.write_invoice).await,
        Err(BastionError::NotFound { .. })
    ));
}

#[tokio::test]
async fn duplicate_permission_triple_is_rejected() {
    let f = setup().await;

    let result = f
        .permissions
        .create(CreatePermission {
            service: "billing".into(),
            entity: "invoice".into(),
            action: "read".into(),
            description: String::new(),
        })
        .await;
    assert!(matches!(result, Err(BastionError::AlreadyExists { .. })));
}

#[tokio::test]
async fn policy_names_are_unique_per_scope() {
    let f = setup().await;

    let same_scope = f
        .policies
        .create(CreatePolicy {
            name: "Invoices".into(),
            description: String::new(),
            tenant_id: Some(f.tenant_id),
        })
        .await;
    assert!(matches!(same_scope, Err(BastionError::AlreadyExists { .. })));

    let other_tenant = f
        .policies
        .create(CreatePolicy {
            name: "Invoices".into(),
            description: String::new(),
            tenant_id: Some(Uuid::new_v4()),
        })
        .await
        .unwrap();
    assert!(!other_tenant.is_system);

    let global = f
        .policies
        .create(CreatePolicy {
            name: "Invoices".into(),
            description: String::new(),
            tenant_id: None,
        })
        .await
        .unwrap();
    assert!(global.is_system);

    let visible = f
        .policies
        .list(Some(f.tenant_id), Pagination::default())
        .await
        .unwrap();
    assert_eq!(visible.total, 2, "own policy plus the global one");
}

#[tokio::test]
async fn roles_lookup_by_name_and_count_members() {
    let f = setup().await;

    let role = f
        .roles
        .get_by_name(Some(f.tenant_id), "Accountant")
        .await
        .unwrap();
    assert_eq!(role.id, f.role_id);
    assert!(!role.is_system);
    assert!(matches!(
        f.roles.get_by_name(None, "Accountant").await,
        Err(BastionError::NotFound { .. })
    ));
    assert_eq!(f.memberships.count_by_role(f.role_id).await.unwrap(), 1);
}
