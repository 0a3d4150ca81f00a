//! Authorization and lifecycle configuration.
//!
//! Built once at process start and handed to each service explicitly.

use bastion_core::error::{BastionError, BastionResult};
use serde::Deserialize;

/// Top-level configuration for the services in this crate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    pub identity: IdentityConfig,
    pub authorization: AuthorizationConfig,
    pub invitation: InvitationConfig,
    pub credentials: CredentialConfig,
    pub tenant_init: TenantInitConfig,
    pub jobs: JobConfig,
}

impl AuthzConfig {
    /// Reject combinations the services cannot run with.
    pub fn validate(&self) -> BastionResult<()> {
        if self.identity.providers.is_empty() {
            return Err(BastionError::validation(
                "at least one identity provider must be enabled",
            ));
        }
        if self.invitation.expiry_hours == 0 {
            return Err(BastionError::validation(
                "invitation.expiry_hours must be positive",
            ));
        }
        let credentials = &self.credentials;
        if credentials.max_grace_period_hours == 0
            || credentials.max_grace_period_hours > MAX_GRACE_PERIOD_HOURS
        {
            return Err(BastionError::validation(format!(
                "credentials.max_grace_period_hours must be between 1 and {MAX_GRACE_PERIOD_HOURS}"
            )));
        }
        if credentials.default_grace_period_hours == 0
            || credentials.default_grace_period_hours > credentials.max_grace_period_hours
        {
            return Err(BastionError::validation(
                "credentials.default_grace_period_hours must be in 1..=max_grace_period_hours",
            ));
        }
        if credentials.email_domain.trim().is_empty() {
            return Err(BastionError::validation(
                "credentials.email_domain must not be empty",
            ));
        }
        if self.tenant_init.request_timeout_secs == 0 {
            return Err(BastionError::validation(
                "tenant_init.request_timeout_secs must be positive",
            ));
        }
        let mut names = std::collections::BTreeSet::new();
        for service in &self.tenant_init.services {
            if service.name.trim().is_empty() || service.base_url.trim().is_empty() {
                return Err(BastionError::validation(
                    "tenant_init.services entries need a name and a base_url",
                ));
            }
            if !names.insert(service.name.as_str()) {
                return Err(BastionError::validation(format!(
                    "tenant_init service '{}' is listed twice",
                    service.name
                )));
            }
        }
        if self.jobs.max_attempts == 0 {
            return Err(BastionError::validation("jobs.max_attempts must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity providers
// ---------------------------------------------------------------------------

/// An identity provider the external authentication service runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityProvider {
    EmailPassword,
    Passwordless,
    ThirdParty { provider: String },
}

impl std::fmt::Display for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmailPassword => f.write_str("email_password"),
            Self::Passwordless => f.write_str("passwordless"),
            Self::ThirdParty { provider } => write!(f, "third_party:{provider}"),
        }
    }
}

/// The explicit list of enabled identity providers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub providers: Vec<IdentityProvider>,
}

impl IdentityConfig {
    pub fn is_enabled(&self, provider: &IdentityProvider) -> bool {
        self.providers.contains(provider)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            providers: vec![IdentityProvider::EmailPassword],
        }
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// How a requested triple is compared against the resolved set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMatching {
    /// The requested triple must be present verbatim.
    #[default]
    Exact,
    /// A stored `*` component matches any requested value.
    Wildcard,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub matching: PermissionMatching,
}

// ---------------------------------------------------------------------------
// Invitations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvitationConfig {
    /// Lifetime of a fresh invitation (default: 72).
    pub expiry_hours: u32,
    /// The plaintext token is appended as `?token=...`.
    pub accept_base_url: String,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            expiry_hours: 72,
            accept_base_url: "http://localhost:3000/invitations/accept".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// System user credentials
// ---------------------------------------------------------------------------

/// Upper bound for any configured or requested grace period.
pub const MAX_GRACE_PERIOD_HOURS: u32 = 168;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Grace period used when the caller does not pass one (default: 168).
    pub default_grace_period_hours: u32,
    /// Largest grace period a caller may request (default: 168).
    pub max_grace_period_hours: u32,
    /// Domain part of generated system user emails.
    pub email_domain: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            default_grace_period_hours: MAX_GRACE_PERIOD_HOURS,
            max_grace_period_hours: MAX_GRACE_PERIOD_HOURS,
            email_domain: "system.internal".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tenant initialization
// ---------------------------------------------------------------------------

/// A downstream service that must be told about every new tenant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub base_url: String,
}

impl ServiceEndpoint {
    pub fn initialize_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitTracking {
    /// Every retry calls every service again.
    #[default]
    AllOrNothing,
    /// Services that already succeeded are recorded and skipped on retry.
    PerService,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TenantInitConfig {
    /// Called in order; an empty list activates tenants immediately.
    pub services: Vec<ServiceEndpoint>,
    pub initialize_path: String,
    pub request_timeout_secs: u64,
    pub tracking: InitTracking,
}

impl Default for TenantInitConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            initialize_path: "/tenants/initialize".into(),
            request_timeout_secs: 30,
            tracking: InitTracking::AllOrNothing,
        }
    }
}

// ---------------------------------------------------------------------------
// Background jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Attempts per job before it is dead-lettered (default: 5).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Period of the system user expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            sweep_interval_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AuthzConfig::default();
        config.validate().unwrap();
        assert_eq!(config.invitation.expiry_hours, 72);
        assert_eq!(config.credentials.max_grace_period_hours, 168);
        assert_eq!(config.tenant_init.initialize_path, "/tenants/initialize");
        assert_eq!(config.authorization.matching, PermissionMatching::Exact);
        assert!(config.identity.is_enabled(&IdentityProvider::EmailPassword));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: AuthzConfig = serde_json::from_value(serde_json::json!({
            "identity": { "providers": [
                { "kind": "passwordless" },
                { "kind": "third_party", "provider": "github" }
            ]},
            "authorization": { "matching": "wildcard" },
            "tenant_init": {
                "services": [{ "name": "billing", "base_url": "http://billing:8080/" }],
                "tracking": "per_service"
            }
        }))
        .unwrap();

        assert!(!config.identity.is_enabled(&IdentityProvider::EmailPassword));
        assert!(config.identity.is_enabled(&IdentityProvider::ThirdParty {
            provider: "github".into()
        }));
        assert_eq!(config.authorization.matching, PermissionMatching::Wildcard);
        assert_eq!(config.tenant_init.tracking, InitTracking::PerService);
        assert_eq!(config.tenant_init.request_timeout_secs, 30);
        assert_eq!(config.invitation.expiry_hours, 72);
    }

    #[test]
    fn initialize_url_joins_cleanly() {
        let endpoint = ServiceEndpoint {
            name: "billing".into(),
            base_url: "http://billing:8080/".into(),
        };
        assert_eq!(
            endpoint.initialize_url("/tenants/initialize"),
            "http://billing:8080/tenants/initialize"
        );
    }

    #[test]
    fn rejects_grace_above_ceiling() {
        let mut config = AuthzConfig::default();
        config.credentials.max_grace_period_hours = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_service_names() {
        let mut config = AuthzConfig::default();
        let endpoint = ServiceEndpoint {
            name: "billing".into(),
            base_url: "http://billing".into(),
        };
        config.tenant_init.services = vec![endpoint.clone(), endpoint];
        assert!(config.validate().is_err());
    }
}
