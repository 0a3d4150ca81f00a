//! Invitation lifecycle.
//!
//! `pending` moves to `accepted`, `expired` or `cancelled`, and never
//! back. Only the SHA-256 hash of a token is stored. Acceptance flips the
//! invitation and writes the membership in one transaction, so a token
//! is consumed at most once. Expiry is checked when the token is
//! presented; there is no background sweep.
//!
//! A user who already belongs to the tenant cannot accept another
//! invitation to it: their role is never changed implicitly.

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::invitation::{CreateInvitation, Invitation, InvitationStatus};
use bastion_core::models::membership::{CreateMembership, Membership, MembershipStatus};
use bastion_core::models::tenant::TenantStatus;
use bastion_core::repository::{
    InvitationRepository, MembershipRepository, PaginatedResult, Pagination, RoleRepository,
    TenantRepository,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::InvitationConfig;
use crate::error::AuthzError;
use crate::jobs::{Job, JobQueue, TenantInitJob};
use crate::membership::assignable_role;
use crate::secret;

const MAX_EMAIL_LEN: usize = 254;

/// Trim and lower-case an email address, rejecting obviously malformed
/// ones.
pub fn normalize_email(raw: &str) -> BastionResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };
    if !valid {
        return Err(BastionError::validation(format!(
            "'{}' is not a valid email address",
            raw.trim()
        )));
    }
    Ok(email)
}

/// Input for inviting someone to a tenant.
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub tenant_id: Uuid,
    pub email: String,
    pub role_id: Uuid,
}

/// A stored invitation plus its plaintext token and accept link. The
/// token is returned exactly once.
#[derive(Debug)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub token: String,
    pub accept_url: String,
}

#[derive(Debug, Clone)]
pub struct AcceptedInvitation {
    pub invitation: Invitation,
    pub membership: Membership,
}

/// Generate a token and store its hash. Rejects a second live pending
/// invitation for the same tenant and email.
pub(crate) async fn issue_invitation<I: InvitationRepository>(
    invitation_repo: &I,
    config: &InvitationConfig,
    tenant_id: Uuid,
    email: String,
    role_id: Uuid,
    invited_by: &str,
    now: DateTime<Utc>,
) -> BastionResult<IssuedInvitation> {
    let token = secret::generate_invitation_token();
    let expires_at = now + Duration::hours(i64::from(config.expiry_hours));

    let invitation = invitation_repo
        .create(
            CreateInvitation {
                tenant_id,
                email: email.clone(),
                role_id,
                invited_by: invited_by.to_string(),
                token_hash: secret::hash_secret(&token),
                expires_at,
            },
            now,
        )
        .await
        .map_err(|e| match e {
            BastionError::Conflict { .. } | BastionError::AlreadyExists { .. } => {
                AuthzError::DuplicatePendingInvitation { email }.into()
            }
            other => other,
        })?;

    info!(
        invitation_id = %invitation.id,
        %tenant_id,
        %role_id,
        %expires_at,
        "invitation created"
    );
    let accept_url = format!("{}?token={token}", config.accept_base_url);
    Ok(IssuedInvitation {
        invitation,
        token,
        accept_url,
    })
}

pub struct InvitationService<I, M, T, R, Q>
where
    I: InvitationRepository,
    M: MembershipRepository,
    T: TenantRepository,
    R: RoleRepository,
    Q: JobQueue,
{
    invitation_repo: I,
    membership_repo: M,
    tenant_repo: T,
    role_repo: R,
    queue: Q,
    config: InvitationConfig,
}

impl<I, M, T, R, Q> InvitationService<I, M, T, R, Q>
where
    I: InvitationRepository,
    M: MembershipRepository,
    T: TenantRepository,
    R: RoleRepository,
    Q: JobQueue,
{
    pub fn new(
        invitation_repo: I,
        membership_repo: M,
        tenant_repo: T,
        role_repo: R,
        queue: Q,
        config: InvitationConfig,
    ) -> Self {
        Self {
            invitation_repo,
            membership_repo,
            tenant_repo,
            role_repo,
            queue,
            config,
        }
    }

    pub async fn create(
        &self,
        input: NewInvitation,
        invited_by: &str,
    ) -> BastionResult<IssuedInvitation> {
        self.create_at(input, invited_by, Utc::now()).await
    }

    pub async fn create_at(
        &self,
        input: NewInvitation,
        invited_by: &str,
        now: DateTime<Utc>,
    ) -> BastionResult<IssuedInvitation> {
        let email = normalize_email(&input.email)?;

        let tenant = self.tenant_repo.get_by_id(input.tenant_id).await?;
        if tenant.status == TenantStatus::Deleted {
            return Err(BastionError::not_found("tenant", input.tenant_id));
        }
        assignable_role(&self.role_repo, input.tenant_id, input.role_id).await?;

        issue_invitation(
            &self.invitation_repo,
            &self.config,
            input.tenant_id,
            email,
            input.role_id,
            invited_by,
            now,
        )
        .await
    }

    /// Consume a token on behalf of an already authenticated user.
    pub async fn accept(&self, token: &str, user_id: &str) -> BastionResult<AcceptedInvitation> {
        self.accept_at(token, user_id, Utc::now()).await
    }

    pub async fn accept_at(
        &self,
        token: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> BastionResult<AcceptedInvitation> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(BastionError::validation("user_id must not be empty"));
        }
        let invitation = self
            .invitation_repo
            .get_by_token_hash(&secret::hash_secret(token.trim()))
            .await?;
        self.accept_invitation(invitation, user_id, now).await
    }

    /// Accept every live pending invitation addressed to `email`, e.g.
    /// right after the user signs up. Invitations that cannot be
    /// accepted are skipped.
    pub async fn accept_pending_for_email(
        &self,
        email: &str,
        user_id: &str,
    ) -> BastionResult<Vec<AcceptedInvitation>> {
        let email = normalize_email(email)?;
        let now = Utc::now();
        let mut accepted = Vec::new();
        for invitation in self.invitation_repo.list_pending_by_email(&email).await? {
            let invitation_id = invitation.id;
            match self.accept_invitation(invitation, user_id, now).await {
                Ok(result) => accepted.push(result),
                Err(e) => {
                    debug!(%invitation_id, user_id, error = %e, "pending invitation skipped");
                }
            }
        }
        Ok(accepted)
    }

    pub async fn get(&self, id: Uuid) -> BastionResult<Invitation> {
        self.invitation_repo.get_by_id(id).await
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<InvitationStatus>,
        pagination: Pagination,
    ) -> BastionResult<PaginatedResult<Invitation>> {
        self.invitation_repo
            .list_by_tenant(tenant_id, status, pagination)
            .await
    }

    /// Only pending invitations can be cancelled.
    pub async fn cancel(&self, id: Uuid) -> BastionResult<Invitation> {
        let invitation = self.invitation_repo.cancel(id, Utc::now()).await?;
        info!(invitation_id = %id, tenant_id = %invitation.tenant_id, "invitation cancelled");
        Ok(invitation)
    }

    async fn accept_invitation(
        &self,
        invitation: Invitation,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> BastionResult<AcceptedInvitation> {
        match invitation.status {
            InvitationStatus::Accepted => return Err(AuthzError::InvitationAlreadyAccepted.into()),
            InvitationStatus::Cancelled => return Err(AuthzError::InvitationCancelled.into()),
            InvitationStatus::Expired => return Err(AuthzError::InvitationExpired.into()),
            InvitationStatus::Pending if invitation.is_expired(now) => {
                self.invitation_repo.mark_expired(invitation.id, now).await?;
                return Err(AuthzError::InvitationExpired.into());
            }
            InvitationStatus::Pending => {}
        }

        let tenant = self.tenant_repo.get_by_id(invitation.tenant_id).await?;
        if tenant.status == TenantStatus::Deleted {
            return Err(BastionError::not_found("tenant", invitation.tenant_id));
        }

        if self.is_member(invitation.tenant_id, user_id).await? {
            return Err(AuthzError::AlreadyMember.into());
        }

        let membership = CreateMembership {
            tenant_id: invitation.tenant_id,
            user_id: user_id.to_string(),
            role_id: invitation.role_id,
            status: MembershipStatus::Active,
            invited_by: Some(invitation.invited_by.clone()),
        };
        let (invitation, membership) = match self
            .invitation_repo
            .accept(invitation.id, membership, now)
            .await
        {
            Ok(pair) => pair,
            Err(BastionError::Conflict { .. } | BastionError::AlreadyExists { .. }) => {
                return Err(self.explain_failed_accept(invitation.id, user_id, now).await);
            }
            Err(e) => return Err(e),
        };

        info!(
            invitation_id = %invitation.id,
            tenant_id = %invitation.tenant_id,
            user_id,
            role_id = %membership.role_id,
            "invitation accepted"
        );

        // A managed tenant is initialized once its admin has joined.
        if tenant.status == TenantStatus::Pending {
            if let Err(e) = self
                .queue
                .enqueue(Job::TenantInitialize(TenantInitJob {
                    tenant_id: tenant.id,
                }))
                .await
            {
                warn!(
                    tenant_id = %tenant.id,
                    error = %e,
                    "failed to enqueue tenant initialization"
                );
            }
        }

        Ok(AcceptedInvitation {
            invitation,
            membership,
        })
    }

    async fn is_member(&self, tenant_id: Uuid, user_id: &str) -> BastionResult<bool> {
        match self
            .membership_repo
            .get_by_tenant_and_user(tenant_id, user_id)
            .await
        {
            Ok(_) => Ok(true),
            Err(BastionError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The accept transaction was refused; re-read state to say why.
    async fn explain_failed_accept(
        &self,
        invitation_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> BastionError {
        let invitation = match self.invitation_repo.get_by_id(invitation_id).await {
            Ok(invitation) => invitation,
            Err(e) => return e,
        };
        match invitation.status {
            InvitationStatus::Accepted => AuthzError::InvitationAlreadyAccepted.into(),
            InvitationStatus::Cancelled => AuthzError::InvitationCancelled.into(),
            InvitationStatus::Expired => AuthzError::InvitationExpired.into(),
            InvitationStatus::Pending if invitation.is_expired(now) => {
                AuthzError::InvitationExpired.into()
            }
            InvitationStatus::Pending => match self.is_member(invitation.tenant_id, user_id).await {
                Ok(true) => AuthzError::AlreadyMember.into(),
                Ok(false) => BastionError::conflict("invitation could not be accepted, try again"),
                Err(e) => e,
            },
        }
    }
}
