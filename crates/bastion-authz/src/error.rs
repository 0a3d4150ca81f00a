//! Authorization and lifecycle error types.

use bastion_core::error::BastionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invitation has expired; ask for a new one")]
    InvitationExpired,

    #[error("invitation has already been accepted")]
    InvitationAlreadyAccepted,

    #[error("invitation has been cancelled")]
    InvitationCancelled,

    #[error("a pending invitation already exists for {email}")]
    DuplicatePendingInvitation { email: String },

    #[error("user is already a member of this tenant")]
    AlreadyMember,

    #[error("grace period must be between 1 and {max} hours, got {hours}")]
    GracePeriodOutOfRange { hours: u32, max: u32 },

    #[error("system {entity} '{name}' cannot be modified")]
    SystemEntityImmutable { entity: &'static str, name: String },

    #[error("identity provider '{0}' is not enabled")]
    ProviderDisabled(String),

    #[error("malformed tenant id '{0}'")]
    MalformedTenantId(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("credential has expired")]
    CredentialExpired,

    #[error("credential is inactive")]
    CredentialInactive,

    #[error("initialization failed: {reason}")]
    InitializationFailed { service: String, reason: String },

    #[error("access denied")]
    AccessDenied,
}

impl From<AuthzError> for BastionError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::InvitationExpired
            | AuthzError::InvitationAlreadyAccepted
            | AuthzError::InvitationCancelled
            | AuthzError::DuplicatePendingInvitation { .. }
            | AuthzError::AlreadyMember => BastionError::Conflict {
                reason: err.to_string(),
            },
            AuthzError::GracePeriodOutOfRange { .. }
            | AuthzError::ProviderDisabled(_)
            | AuthzError::MalformedTenantId(_) => BastionError::Validation {
                message: err.to_string(),
            },
            AuthzError::InvalidCredentials
            | AuthzError::CredentialExpired
            | AuthzError::CredentialInactive => BastionError::AuthenticationFailed {
                reason: err.to_string(),
            },
            AuthzError::InitializationFailed { service, reason } => {
                BastionError::Upstream { service, reason }
            }
            AuthzError::SystemEntityImmutable { .. } | AuthzError::AccessDenied => {
                BastionError::Forbidden
            }
        }
    }
}
