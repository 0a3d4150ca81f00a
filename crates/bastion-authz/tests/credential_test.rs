//! Integration tests for system user credentials: creation, rotation
//! with a grace period, regeneration and the expiry sweep.

use bastion_authz::config::{CredentialConfig, IdentityConfig, IdentityProvider};
use bastion_authz::{IssuedCredential, NewSystemUser, SystemUserService};
use bastion_core::error::BastionError;
use bastion_core::models::system_user::{CreateSystemUser, ServiceType, SystemUserMetadata};
use bastion_core::repository::{Pagination, SystemUserRepository};
use bastion_db::repository::SurrealSystemUserRepository;
use chrono::{Duration, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};

type Credentials = SystemUserService<SurrealSystemUserRepository<Db>>;

/// Helper: in-memory DB with migrations applied.
async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    bastion_db::run_migrations(&db).await.unwrap();
    db
}

fn service(db: &Surreal<Db>) -> Credentials {
    SystemUserService::new(
        SurrealSystemUserRepository::new(db.clone()),
        CredentialConfig::default(),
        &IdentityConfig::default(),
    )
}

fn billing_sync() -> NewSystemUser {
    NewSystemUser {
        application_name: "billing-sync".into(),
        description: "Nightly invoice export".into(),
        service_type: ServiceType::Cron,
        metadata: SystemUserMetadata::default(),
    }
}

async fn login(
    svc: &Credentials,
    credential: &IssuedCredential,
    at: chrono::DateTime<Utc>,
) -> Result<(), BastionError> {
    svc.authenticate_at(&credential.system_user.email, &credential.secret, at)
        .await
        .map(|_| ())
}

#[tokio::test]
async fn create_issues_primary_credential() {
    let db = setup().await;
    let svc = service(&db);
    let issued = svc.create(billing_sync(), "ops").await.unwrap();

    let user = &issued.system_user;
    assert_eq!(user.name, "billing-sync");
    assert_eq!(user.email, "billing-sync@system.internal");
    assert!(user.is_primary && user.is_active);
    assert!(user.expires_at.is_none());
    assert!(user.user_id.starts_with("sys_"));
    assert!(issued.secret.starts_with("sysuser_"));
    assert_ne!(user.secret_hash, issued.secret);

    let seen = svc
        .authenticate(&user.email, &issued.secret)
        .await
        .unwrap();
    assert!(seen.last_used_at.is_some());
}

#[tokio::test]
async fn application_names_are_unique_and_validated() {
    let db = setup().await;
    let svc = service(&db);
    svc.create(billing_sync(), "ops").await.unwrap();

    let mut again = billing_sync();
    again.application_name = " Billing-Sync ".into();
    assert!(matches!(
        svc.create(again, "ops").await,
        Err(BastionError::AlreadyExists { .. })
    ));

    let mut bad = billing_sync();
    bad.application_name = "billing sync!".into();
    assert!(matches!(
        svc.create(bad, "ops").await,
        Err(BastionError::Validation { .. })
    ));
}

#[tokio::test]
async fn generation_shaped_application_names_are_rejected() {
    let db = setup().await;
    let svc = service(&db);
    let original = svc.create(billing_sync(), "ops").await.unwrap();

    let mut lookalike = billing_sync();
    lookalike.application_name = "billing-sync-v2".into();
    assert!(matches!(
        svc.create(lookalike, "ops").await,
        Err(BastionError::Validation { .. })
    ));

    // Both rotations get through, with no other application in the way.
    let t0 = Utc::now();
    let second = svc
        .rotate_with_grace_period_at(original.system_user.id, Some(1), "ops", t0)
        .await
        .unwrap();
    let third = svc
        .rotate_with_grace_period_at(second.current.system_user.id, Some(1), "ops", t0)
        .await
        .unwrap();
    assert_eq!(third.current.system_user.name, "billing-sync-v3");
}

#[tokio::test]
async fn taken_generation_name_is_not_reported_as_stale_primary() {
    let db = setup().await;
    let svc = service(&db);
    let original = svc.create(billing_sync(), "ops").await.unwrap();

    // A row written before the naming rule existed holds the next name.
    SurrealSystemUserRepository::new(db.clone())
        .create(CreateSystemUser {
            name: "billing-sync-v2".into(),
            application_name: "billing-sync-v2".into(),
            email: "billing-sync-v2@system.internal".into(),
            user_id: "sys_legacy".into(),
            description: "Legacy".into(),
            service_type: ServiceType::Worker,
            secret_hash: "hash-legacy".into(),
            created_by: "ops".into(),
            metadata: SystemUserMetadata::default(),
        })
        .await
        .unwrap();

    let err = svc
        .rotate_with_grace_period(original.system_user.id, Some(1), "ops")
        .await
        .unwrap_err();
    match err {
        BastionError::AlreadyExists { entity } => assert!(entity.contains("billing-sync-v2")),
        other => panic!("unexpected error: {other:?}"),
    }

    let primary = svc.get_primary("billing-sync").await.unwrap();
    assert_eq!(primary.id, original.system_user.id);
    login(&svc, &original, Utc::now()).await.unwrap();
}

#[tokio::test]
async fn create_requires_email_password_provider() {
    let db = setup().await;
    let svc = SystemUserService::new(
        SurrealSystemUserRepository::new(db.clone()),
        CredentialConfig::default(),
        &IdentityConfig {
            providers: vec![IdentityProvider::Passwordless],
        },
    );
    assert!(matches!(
        svc.create(billing_sync(), "ops").await,
        Err(BastionError::Validation { .. })
    ));
}

#[tokio::test]
async fn rotation_keeps_old_secret_valid_during_grace() {
    let db = setup().await;
    let svc = service(&db);
    let t0 = Utc::now();
    let original = svc.create(billing_sync(), "ops").await.unwrap();

    let rotated = svc
        .rotate_with_grace_period_at(original.system_user.id, Some(24), "ops", t0)
        .await
        .unwrap();
    assert_eq!(rotated.grace_expires_at, t0 + Duration::hours(24));
    assert!(!rotated.previous.is_primary);
    assert!(rotated.current.system_user.is_primary);
    assert_eq!(rotated.current.system_user.name, "billing-sync-v2");
    assert_ne!(rotated.current.secret, original.secret);

    // Both generations work inside the window.
    let inside = t0 + Duration::hours(23);
    login(&svc, &original, inside).await.unwrap();
    login(&svc, &rotated.current, inside).await.unwrap();

    // Only the new one works after it.
    let after = t0 + Duration::hours(25);
    assert!(matches!(
        login(&svc, &original, after).await,
        Err(BastionError::AuthenticationFailed { .. })
    ));
    login(&svc, &rotated.current, after).await.unwrap();

    let primary = svc.get_primary("billing-sync").await.unwrap();
    assert_eq!(primary.id, rotated.current.system_user.id);
}

#[tokio::test]
async fn rotation_through_old_generation_targets_primary() {
    let db = setup().await;
    let svc = service(&db);
    let t0 = Utc::now();
    let original = svc.create(billing_sync(), "ops").await.unwrap();
    svc.rotate_with_grace_period_at(original.system_user.id, None, "ops", t0)
        .await
        .unwrap();

    let third = svc
        .rotate_with_grace_period_at(original.system_user.id, Some(1), "ops", t0)
        .await
        .unwrap();
    assert_eq!(third.current.system_user.name, "billing-sync-v3");
    assert_eq!(third.previous.name, "billing-sync-v2");

    let generations = svc.generations("billing-sync").await.unwrap();
    assert_eq!(generations.len(), 3);
    assert_eq!(generations.iter().filter(|g| g.is_primary).count(), 1);
}

#[tokio::test]
async fn grace_period_must_be_in_range() {
    let db = setup().await;
    let svc = service(&db);
    let original = svc.create(billing_sync(), "ops").await.unwrap();

    for hours in [0, 169, 10_000] {
        assert!(matches!(
            svc.rotate_with_grace_period(original.system_user.id, Some(hours), "ops")
                .await,
            Err(BastionError::Validation { .. })
        ));
    }
    assert_eq!(svc.generations("billing-sync").await.unwrap().len(), 1);
}

#[tokio::test]
async fn revoke_old_ends_grace_immediately() {
    let db = setup().await;
    let svc = service(&db);
    let t0 = Utc::now();
    let original = svc.create(billing_sync(), "ops").await.unwrap();
    let rotated = svc
        .rotate_with_grace_period_at(original.system_user.id, Some(48), "ops", t0)
        .await
        .unwrap();

    let revoked = svc
        .revoke_old_at(rotated.current.system_user.id, t0 + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(revoked, 1);

    let soon = t0 + Duration::minutes(10);
    assert!(matches!(
        login(&svc, &original, soon).await,
        Err(BastionError::AuthenticationFailed { .. })
    ));
    login(&svc, &rotated.current, soon).await.unwrap();
}

#[tokio::test]
async fn regenerate_invalidates_old_secret_at_once() {
    let db = setup().await;
    let svc = service(&db);
    let original = svc.create(billing_sync(), "ops").await.unwrap();

    let fresh = svc
        .regenerate_password(original.system_user.id, "ops")
        .await
        .unwrap();
    assert!(fresh.system_user.is_primary);

    assert!(matches!(
        login(&svc, &original, Utc::now()).await,
        Err(BastionError::AuthenticationFailed { .. })
    ));
    login(&svc, &fresh, Utc::now()).await.unwrap();
    assert!(!svc.get(original.system_user.id).await.unwrap().is_active);
}

#[tokio::test]
async fn sweep_deactivates_expired_generations() {
    let db = setup().await;
    let svc = service(&db);
    let t0 = Utc::now();
    let original = svc.create(billing_sync(), "ops").await.unwrap();
    svc.rotate_with_grace_period_at(original.system_user.id, Some(2), "ops", t0)
        .await
        .unwrap();

    assert_eq!(
        svc.deactivate_expired_at(t0 + Duration::hours(1)).await.unwrap(),
        0
    );
    assert_eq!(
        svc.deactivate_expired_at(t0 + Duration::hours(3)).await.unwrap(),
        1
    );
    assert!(!svc.get(original.system_user.id).await.unwrap().is_active);

    let active = svc.list(true, Pagination::default()).await.unwrap();
    assert_eq!(active.total, 1);
    assert!(active.items[0].is_primary);
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let db = setup().await;
    let svc = service(&db);
    let issued = svc.create(billing_sync(), "ops").await.unwrap();

    let wrong_secret = svc
        .authenticate(&issued.system_user.email, "sysuser_wrong")
        .await
        .unwrap_err();
    let unknown_email = svc
        .authenticate("nobody@system.internal", &issued.secret)
        .await
        .unwrap_err();
    assert_eq!(wrong_secret.to_string(), unknown_email.to_string());
    assert!(matches!(
        wrong_secret,
        BastionError::AuthenticationFailed { .. }
    ));
}

#[tokio::test]
async fn deactivated_credential_is_rejected() {
    let db = setup().await;
    let svc = service(&db);
    let issued = svc.create(billing_sync(), "ops").await.unwrap();

    let deactivated = svc.deactivate(issued.system_user.id).await.unwrap();
    assert!(!deactivated.is_active);
    assert!(matches!(
        login(&svc, &issued, Utc::now()).await,
        Err(BastionError::AuthenticationFailed { .. })
    ));
}
