//! Tenant lifecycle controller — drives a tenant from `pending` to
//! `active` by initializing it in every configured downstream service.
//!
//! Services are called one at a time, in configuration order. The first
//! failure ends the run with an upstream error and the tenant stays
//! `pending`; the job worker owns retries. Running the job again for an
//! active tenant does nothing.

use std::collections::BTreeSet;
use std::time::Duration;

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::models::tenant::{Tenant, TenantMetadata, TenantStatus};
use bastion_core::repository::TenantRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{InitTracking, ServiceEndpoint, TenantInitConfig};
use crate::error::AuthzError;
use crate::jobs::TenantInitJob;

/// Body POSTed to each service's initialization endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantInitRequest {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_slug: String,
    pub metadata: TenantMetadata,
    pub created_at: DateTime<Utc>,
}

impl From<&Tenant> for TenantInitRequest {
    fn from(tenant: &Tenant) -> Self {
        Self {
            tenant_id: tenant.id,
            tenant_name: tenant.name.clone(),
            tenant_slug: tenant.slug.clone(),
            metadata: tenant.metadata.clone(),
            created_at: tenant.created_at,
        }
    }
}

/// Tells one downstream service about a new tenant. Implementations
/// must be safe to call again for the same tenant.
pub trait TenantInitializer: Send + Sync {
    fn initialize(
        &self,
        service: &ServiceEndpoint,
        request: &TenantInitRequest,
    ) -> impl Future<Output = Result<(), AuthzError>> + Send;
}

/// [`TenantInitializer`] over HTTP: `POST {base_url}{initialize_path}`
/// with a JSON body. Any non-2xx status or a timeout is a failure.
#[derive(Clone)]
pub struct HttpTenantInitializer {
    client: reqwest::Client,
    initialize_path: String,
}

impl HttpTenantInitializer {
    pub fn new(config: &TenantInitConfig) -> BastionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BastionError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            initialize_path: config.initialize_path.clone(),
        })
    }
}

impl TenantInitializer for HttpTenantInitializer {
    async fn initialize(
        &self,
        service: &ServiceEndpoint,
        request: &TenantInitRequest,
    ) -> Result<(), AuthzError> {
        let url = service.initialize_url(&self.initialize_path);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AuthzError::InitializationFailed {
                service: service.name.clone(),
                reason: if e.is_timeout() {
                    "request timed out".into()
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthzError::InitializationFailed {
                service: service.name.clone(),
                reason: format!("unexpected status {status}"),
            });
        }
        Ok(())
    }
}

/// What a controller run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The tenant was already active; nothing was called.
    AlreadyActive,
    /// The tenant is suspended or deleted; nothing was called.
    Skipped(TenantStatus),
    /// Every service succeeded and the tenant is now active.
    Activated { services_called: usize },
}

pub struct TenantLifecycleController<T: TenantRepository, I: TenantInitializer> {
    tenant_repo: T,
    initializer: I,
    services: Vec<ServiceEndpoint>,
    tracking: InitTracking,
}

impl<T: TenantRepository, I: TenantInitializer> TenantLifecycleController<T, I> {
    pub fn new(tenant_repo: T, initializer: I, config: &TenantInitConfig) -> Self {
        Self {
            tenant_repo,
            initializer,
            services: config.services.clone(),
            tracking: config.tracking,
        }
    }

    pub async fn run(&self, job: &TenantInitJob) -> BastionResult<InitOutcome> {
        let tenant = self.tenant_repo.get_by_id(job.tenant_id).await?;
        match tenant.status {
            TenantStatus::Active => {
                debug!(tenant_id = %tenant.id, "tenant already active");
                return Ok(InitOutcome::AlreadyActive);
            }
            TenantStatus::Suspended | TenantStatus::Deleted => {
                info!(tenant_id = %tenant.id, status = ?tenant.status, "skipping initialization");
                return Ok(InitOutcome::Skipped(tenant.status));
            }
            TenantStatus::Pending => {}
        }

        let completed: BTreeSet<String> = match self.tracking {
            InitTracking::PerService => self
                .tenant_repo
                .completed_init_services(tenant.id)
                .await?
                .into_iter()
                .collect(),
            InitTracking::AllOrNothing => BTreeSet::new(),
        };

        let request = TenantInitRequest::from(&tenant);
        let mut services_called = 0;
        for service in &self.services {
            if completed.contains(&service.name) {
                debug!(tenant_id = %tenant.id, service = %service.name, "already initialized");
                continue;
            }

            services_called += 1;
            if let Err(e) = self.initializer.initialize(service, &request).await {
                warn!(
                    tenant_id = %tenant.id,
                    service = %service.name,
                    error = %e,
                    "tenant initialization failed"
                );
                return Err(e.into());
            }
            debug!(tenant_id = %tenant.id, service = %service.name, "service initialized");

            if self.tracking == InitTracking::PerService {
                self.tenant_repo
                    .record_init_service(tenant.id, &service.name)
                    .await?;
            }
        }

        if self.tenant_repo.activate_if_pending(tenant.id).await? {
            info!(tenant_id = %tenant.id, services_called, "tenant activated");
            return Ok(InitOutcome::Activated { services_called });
        }

        // Lost a race: a concurrent run activated it, or an admin
        // changed the status while services were being called.
        let current = self.tenant_repo.get_by_id(tenant.id).await?;
        match current.status {
            TenantStatus::Active => Ok(InitOutcome::AlreadyActive),
            status => Ok(InitOutcome::Skipped(status)),
        }
    }
}
