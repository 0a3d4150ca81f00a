//! Bastion Server — process entry point.
//!
//! Loads configuration, connects to SurrealDB, applies migrations,
//! bootstraps the built-in roles, then runs the job worker and the
//! periodic credential sweep until Ctrl-C.

mod settings;

use std::process::ExitCode;
use std::time::Duration;

use bastion_authz::{
    ChannelJobQueue, HttpTenantInitializer, Job, JobQueue, JobWorker, LifecycleJobHandler,
    RbacService, SystemUserService, TenantLifecycleController,
};
use bastion_core::error::BastionError;
use bastion_db::repository::{
    SurrealMembershipRepository, SurrealPermissionRepository, SurrealPolicyRepository,
    SurrealRoleRepository, SurrealSystemUserRepository, SurrealTenantRepository,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use settings::{DEFAULT_CONFIG_FILE, ServerConfig};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to connect to SurrealDB: {0}")]
    Connect(#[from] surrealdb::Error),

    #[error(transparent)]
    Bastion(#[from] BastionError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bastion=info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    info!("Starting Bastion server...");
    match run().await {
        Ok(()) => {
            info!("Bastion server stopped.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Bastion server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let config = ServerConfig::load(DEFAULT_CONFIG_FILE)?;
    config.authz.validate()?;

    let providers: Vec<String> = config
        .authz
        .identity
        .providers
        .iter()
        .map(ToString::to_string)
        .collect();
    info!(?providers, matching = ?config.authz.authorization.matching, "authorization configured");

    let db = bastion_db::connect(&config.database).await?;
    bastion_db::run_migrations(&db)
        .await
        .map_err(BastionError::from)?;

    let rbac = RbacService::new(
        SurrealPermissionRepository::new(db.clone()),
        SurrealPolicyRepository::new(db.clone()),
        SurrealRoleRepository::new(db.clone()),
        SurrealMembershipRepository::new(db.clone()),
    );
    let roles = rbac.bootstrap_system_roles().await?;
    info!(count = roles.len(), "system roles ready");

    let tenant_init = &config.authz.tenant_init;
    info!(
        services = tenant_init.services.len(),
        tracking = ?tenant_init.tracking,
        "tenant initialization configured"
    );
    let controller = TenantLifecycleController::new(
        SurrealTenantRepository::new(db.clone()),
        HttpTenantInitializer::new(tenant_init)?,
        tenant_init,
    );
    let system_users = SystemUserService::new(
        SurrealSystemUserRepository::new(db.clone()),
        config.authz.credentials.clone(),
        &config.authz.identity,
    );

    let (queue, receiver) = ChannelJobQueue::new();
    let worker = JobWorker::new(
        receiver,
        LifecycleJobHandler::new(controller, system_users),
        &config.authz.jobs,
    );
    let worker = tokio::spawn(worker.run());

    let period = Duration::from_secs(config.authz.jobs.sweep_interval_secs.max(1));
    let sweep = tokio::spawn(schedule_sweep(queue.clone(), period));

    info!(sweep_interval_secs = period.as_secs(), "Bastion server started");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown requested");

    // The worker exits once every queue handle is gone.
    sweep.abort();
    drop(queue);
    if let Err(e) = worker.await {
        warn!(error = %e, "job worker did not stop cleanly");
    }
    Ok(())
}

/// Queue a credential expiry sweep every `period`.
async fn schedule_sweep(queue: ChannelJobQueue, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = queue.enqueue(Job::SystemUserExpirySweep).await {
            warn!(error = %e, "credential sweep not scheduled, stopping");
            return;
        }
    }
}
