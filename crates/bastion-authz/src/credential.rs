//! System user credential lifecycle.
//!
//! Each application owns a chain of credential generations. Exactly one
//! generation is primary. Rotation demotes the primary with a grace
//! deadline and inserts a new primary in the same transaction, so both
//! authenticate until the deadline passes. Regeneration deactivates the
//! old generation immediately.
//!
//! Authentication evaluates `expires_at` live; the periodic sweep only
//! tidies up `is_active`.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::system_user::{
    CreateSystemUser, ServiceType, SystemUser, SystemUserMetadata,
};
use bastion_core::repository::{PaginatedResult, Pagination, SystemUserRepository};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CredentialConfig, IdentityConfig, IdentityProvider};
use crate::error::AuthzError;
use crate::secret;
use crate::tenant::validate_slug;

/// Input for registering a new application.
#[derive(Debug, Clone)]
pub struct NewSystemUser {
    pub application_name: String,
    pub description: String,
    pub service_type: ServiceType,
    pub metadata: SystemUserMetadata,
}

/// A credential generation together with its plaintext secret. The
/// secret is not stored and cannot be retrieved again.
#[derive(Debug)]
pub struct IssuedCredential {
    pub system_user: SystemUser,
    pub secret: String,
}

#[derive(Debug)]
pub struct RotatedCredential {
    pub current: IssuedCredential,
    /// The demoted generation, still valid until `grace_expires_at`.
    pub previous: SystemUser,
    pub grace_expires_at: DateTime<Utc>,
}

pub struct SystemUserService<S: SystemUserRepository> {
    system_user_repo: S,
    config: CredentialConfig,
    email_password_enabled: bool,
}

impl<S: SystemUserRepository> SystemUserService<S> {
    pub fn new(system_user_repo: S, config: CredentialConfig, identity: &IdentityConfig) -> Self {
        Self {
            system_user_repo,
            config,
            email_password_enabled: identity.is_enabled(&IdentityProvider::EmailPassword),
        }
    }

    /// Register an application and issue its first credential.
    pub async fn create(
        &self,
        input: NewSystemUser,
        created_by: &str,
    ) -> BastionResult<IssuedCredential> {
        if !self.email_password_enabled {
            return Err(
                AuthzError::ProviderDisabled(IdentityProvider::EmailPassword.to_string()).into(),
            );
        }
        let application_name = input.application_name.trim().to_lowercase();
        validate_slug("application_name", &application_name)?;
        if has_generation_suffix(&application_name) {
            return Err(BastionError::validation(
                "application_name must not end in a generation suffix like '-v2'",
            ));
        }

        if self
            .system_user_repo
            .count_by_application(&application_name)
            .await?
            > 0
        {
            return Err(BastionError::AlreadyExists {
                entity: format!("system user '{application_name}'"),
            });
        }

        let (row, plaintext) = self.generation(
            application_name.clone(),
            application_name.clone(),
            input.description.trim().to_string(),
            input.service_type,
            input.metadata,
            created_by,
        );
        let system_user = self.system_user_repo.create(row).await?;
        info!(
            application_name,
            system_user_id = %system_user.id,
            "system user created"
        );
        Ok(IssuedCredential {
            system_user,
            secret: plaintext,
        })
    }

    /// Issue a new primary and deactivate the old one at once.
    pub async fn regenerate_password(
        &self,
        id: Uuid,
        actor: &str,
    ) -> BastionResult<IssuedCredential> {
        self.regenerate_password_at(id, actor, Utc::now()).await
    }

    pub async fn regenerate_password_at(
        &self,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> BastionResult<IssuedCredential> {
        let primary = self.primary_for(id).await?;
        let (row, plaintext) = self.next_generation(&primary, actor).await?;

        let name = row.name.clone();
        let system_user = match self
            .system_user_repo
            .regenerate(&primary.application_name, row, now)
            .await
        {
            Ok(u) => u,
            Err(e) => return Err(self.swap_failed(e, &primary, &name).await),
        };
        info!(
            application_name = %primary.application_name,
            previous_id = %primary.id,
            current_id = %system_user.id,
            "system user credential regenerated"
        );
        Ok(IssuedCredential {
            system_user,
            secret: plaintext,
        })
    }

    /// Issue a new primary while keeping the old one valid for
    /// `grace_period_hours` (the configured default when `None`).
    pub async fn rotate_with_grace_period(
        &self,
        id: Uuid,
        grace_period_hours: Option<u32>,
        actor: &str,
    ) -> BastionResult<RotatedCredential> {
        self.rotate_with_grace_period_at(id, grace_period_hours, actor, Utc::now())
            .await
    }

    pub async fn rotate_with_grace_period_at(
        &self,
        id: Uuid,
        grace_period_hours: Option<u32>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> BastionResult<RotatedCredential> {
        let hours = grace_period_hours.unwrap_or(self.config.default_grace_period_hours);
        self.validate_grace(hours)?;

        let primary = self.primary_for(id).await?;
        let (row, plaintext) = self.next_generation(&primary, actor).await?;
        let grace_expires_at = now + Duration::hours(i64::from(hours));

        let name = row.name.clone();
        let system_user = match self
            .system_user_repo
            .rotate(&primary.application_name, row, grace_expires_at, now)
            .await
        {
            Ok(u) => u,
            Err(e) => return Err(self.swap_failed(e, &primary, &name).await),
        };
        let previous = self.system_user_repo.get_by_id(primary.id).await?;
        info!(
            application_name = %primary.application_name,
            previous_id = %previous.id,
            current_id = %system_user.id,
            grace_hours = hours,
            "system user credential rotated"
        );

        Ok(RotatedCredential {
            current: IssuedCredential {
                system_user,
                secret: plaintext,
            },
            previous,
            grace_expires_at,
        })
    }

    /// End the grace period of every older generation now.
    pub async fn revoke_old(&self, id: Uuid) -> BastionResult<u64> {
        self.revoke_old_at(id, Utc::now()).await
    }

    pub async fn revoke_old_at(&self, id: Uuid, now: DateTime<Utc>) -> BastionResult<u64> {
        let system_user = self.system_user_repo.get_by_id(id).await?;
        let revoked = self
            .system_user_repo
            .revoke_non_primary(&system_user.application_name, now)
            .await?;
        info!(
            application_name = %system_user.application_name,
            revoked,
            "old system user credentials revoked"
        );
        Ok(revoked)
    }

    pub async fn deactivate(&self, id: Uuid) -> BastionResult<SystemUser> {
        let system_user = self.system_user_repo.deactivate(id, Utc::now()).await?;
        info!(
            application_name = %system_user.application_name,
            system_user_id = %id,
            "system user deactivated"
        );
        Ok(system_user)
    }

    /// Sweep: flip `is_active` off on every generation past its deadline.
    pub async fn deactivate_expired(&self) -> BastionResult<u64> {
        self.deactivate_expired_at(Utc::now()).await
    }

    pub async fn deactivate_expired_at(&self, now: DateTime<Utc>) -> BastionResult<u64> {
        let count = self.system_user_repo.deactivate_expired(now).await?;
        if count > 0 {
            info!(count, "expired system user credentials deactivated");
        } else {
            debug!("no expired system user credentials");
        }
        Ok(count)
    }

    /// Check a presented credential. Inactive and expired generations
    /// are rejected even if the secret matches.
    pub async fn authenticate(&self, email: &str, secret: &str) -> BastionResult<SystemUser> {
        self.authenticate_at(email, secret, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        email: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> BastionResult<SystemUser> {
        let email = email.trim().to_lowercase();
        let system_user = match self.system_user_repo.get_by_email(&email).await {
            Ok(u) => u,
            Err(BastionError::NotFound { .. }) => {
                return Err(AuthzError::InvalidCredentials.into());
            }
            Err(e) => return Err(e),
        };

        if !secret::verify_secret(secret, &system_user.secret_hash) {
            debug!(email, "system user secret mismatch");
            return Err(AuthzError::InvalidCredentials.into());
        }
        if !system_user.is_active {
            return Err(AuthzError::CredentialInactive.into());
        }
        if system_user.is_expired(now) {
            return Err(AuthzError::CredentialExpired.into());
        }

        self.system_user_repo
            .record_last_used(system_user.id, now)
            .await?;
        Ok(SystemUser {
            last_used_at: Some(now),
            ..system_user
        })
    }

    pub async fn get(&self, id: Uuid) -> BastionResult<SystemUser> {
        self.system_user_repo.get_by_id(id).await
    }

    pub async fn get_primary(&self, application_name: &str) -> BastionResult<SystemUser> {
        self.system_user_repo.get_primary(application_name).await
    }

    pub async fn list(
        &self,
        active_only: bool,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<SystemUser>> {
        self.system_user_repo.list(active_only, pagination).await
    }

    /// Every generation of an application, newest first.
    pub async fn generations(&self, application_name: &str) -> BastionResult<Vec<SystemUser>> {
        self.system_user_repo
            .list_by_application(application_name)
            .await
    }

    fn validate_grace(&self, hours: u32) -> Result<(), AuthzError> {
        if hours == 0 || hours > self.config.max_grace_period_hours {
            return Err(AuthzError::GracePeriodOutOfRange {
                hours,
                max: self.config.max_grace_period_hours,
            });
        }
        Ok(())
    }

    async fn primary_for(&self, id: Uuid) -> BastionResult<SystemUser> {
        let system_user = self.system_user_repo.get_by_id(id).await?;
        if system_user.is_primary {
            return Ok(system_user);
        }
        self.system_user_repo
            .get_primary(&system_user.application_name)
            .await
    }

    async fn next_generation(
        &self,
        primary: &SystemUser,
        created_by: &str,
    ) -> BastionResult<(CreateSystemUser, String)> {
        let existing = self
            .system_user_repo
            .count_by_application(&primary.application_name)
            .await?;
        Ok(self.generation(
            format!("{}-v{}", primary.application_name, existing + 1),
            primary.application_name.clone(),
            primary.description.clone(),
            primary.service_type,
            primary.metadata.clone(),
            created_by,
        ))
    }

    fn generation(
        &self,
        name: String,
        application_name: String,
        description: String,
        service_type: ServiceType,
        metadata: SystemUserMetadata,
        created_by: &str,
    ) -> (CreateSystemUser, String) {
        let plaintext = secret::generate_system_secret();
        let row = CreateSystemUser {
            email: format!("{name}@{}", self.config.email_domain),
            name,
            application_name,
            user_id: secret::generate_system_user_id(),
            description,
            service_type,
            secret_hash: secret::hash_secret(&plaintext),
            created_by: created_by.to_string(),
            metadata,
        };
        (row, plaintext)
    }

    /// Explain a failed swap. If the primary is unchanged, the new
    /// generation's name or email was already taken.
    async fn swap_failed(
        &self,
        err: BastionError,
        primary: &SystemUser,
        generation_name: &str,
    ) -> BastionError {
        if !matches!(
            err,
            BastionError::Conflict { .. } | BastionError::AlreadyExists { .. }
        ) {
            return err;
        }
        match self
            .system_user_repo
            .get_primary(&primary.application_name)
            .await
        {
            Ok(current) if current.id == primary.id => {
                warn!(
                    application_name = %primary.application_name,
                    generation_name,
                    "credential generation name already taken"
                );
                BastionError::AlreadyExists {
                    entity: format!("system user '{generation_name}'"),
                }
            }
            Ok(_) | Err(BastionError::NotFound { .. }) => BastionError::conflict(format!(
                "credential '{}' is no longer the primary for '{}'",
                primary.name, primary.application_name
            )),
            Err(e) => e,
        }
    }
}

/// Generation names are `<application>-v<n>`; an application name of that
/// shape could collide with another application's generations.
fn has_generation_suffix(application_name: &str) -> bool {
    match application_name.rsplit_once("-v") {
        Some((prefix, digits)) => {
            !prefix.is_empty()
                && !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRepo;

    impl SystemUserRepository for NoRepo {
        async fn create(&self, _: CreateSystemUser) -> BastionResult<SystemUser> {
            unreachable!()
        }
        async fn get_by_id(&self, _: Uuid) -> BastionResult<SystemUser> {
            unreachable!()
        }
        async fn get_by_email(&self, _: &str) -> BastionResult<SystemUser> {
            unreachable!()
        }
        async fn get_primary(&self, _: &str) -> BastionResult<SystemUser> {
            unreachable!()
        }
        async fn list(
            &self,
            _: bool,
            _: Pagination,
        ) -> BastionResult<PaginatedResult<SystemUser>> {
            unreachable!()
        }
        async fn list_by_application(&self, _: &str) -> BastionResult<Vec<SystemUser>> {
            unreachable!()
        }
        async fn count_by_application(&self, _: &str) -> BastionResult<u64> {
            unreachable!()
        }
        async fn rotate(
            &self,
            _: &str,
            _: CreateSystemUser,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> BastionResult<SystemUser> {
            unreachable!()
        }
        async fn regenerate(
            &self,
            _: &str,
            _: CreateSystemUser,
            _: DateTime<Utc>,
        ) -> BastionResult<SystemUser> {
            unreachable!()
        }
        async fn revoke_non_primary(&self, _: &str, _: DateTime<Utc>) -> BastionResult<u64> {
            unreachable!()
        }
        async fn deactivate(&self, _: Uuid, _: DateTime<Utc>) -> BastionResult<SystemUser> {
            unreachable!()
        }
        async fn deactivate_expired(&self, _: DateTime<Utc>) -> BastionResult<u64> {
            unreachable!()
        }
        async fn record_last_used(&self, _: Uuid, _: DateTime<Utc>) -> BastionResult<()> {
            unreachable!()
        }
    }

    fn service() -> SystemUserService<NoRepo> {
        SystemUserService::new(NoRepo, CredentialConfig::default(), &IdentityConfig::default())
    }

    #[test]
    fn grace_period_bounds() {
        let svc = service();
        assert!(svc.validate_grace(1).is_ok());
        assert!(svc.validate_grace(168).is_ok());
        assert!(matches!(
            svc.validate_grace(0),
            Err(AuthzError::GracePeriodOutOfRange { hours: 0, max: 168 })
        ));
        assert!(matches!(
            svc.validate_grace(169),
            Err(AuthzError::GracePeriodOutOfRange { hours: 169, .. })
        ));
    }

    #[test]
    fn generation_suffix_detection() {
        for name in ["billing-sync-v2", "app-v10", "x-v0"] {
            assert!(has_generation_suffix(name), "{name}");
        }
        for name in ["billing-sync", "billing-v", "billing-vx2", "dev-visor", "-v2"] {
            assert!(!has_generation_suffix(name), "{name}");
        }
    }

    #[test]
    fn generation_rows_carry_hash_not_plaintext() {
        let svc = service();
        let (row, plaintext) = svc.generation(
            "billing-sync-v2".into(),
            "billing-sync".into(),
            "Billing".into(),
            ServiceType::Worker,
            SystemUserMetadata::default(),
            "alice",
        );
        assert_eq!(row.email, "billing-sync-v2@system.internal");
        assert_ne!(row.secret_hash, plaintext);
        assert!(secret::verify_secret(&plaintext, &row.secret_hash));
        assert!(row.user_id.starts_with("sys_"));
    }

    #[tokio::test]
    async fn create_requires_email_password_provider() {
        let identity = IdentityConfig {
            providers: vec![IdentityProvider::Passwordless],
        };
        let svc = SystemUserService::new(NoRepo, CredentialConfig::default(), &identity);
        let err = svc
            .create(
                NewSystemUser {
                    application_name: "billing-sync".into(),
                    description: String::new(),
                    service_type: ServiceType::Worker,
                    metadata: SystemUserMetadata::default(),
                },
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BastionError::Validation { .. }));
    }
}
