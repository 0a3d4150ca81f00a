//! Bastion Authz — permission resolution, tenant access enforcement and
//! the lifecycle services (tenants, invitations, machine credentials)
//! that feed authorization decisions.
//!
//! Every service is generic over the repository traits in
//! `bastion-core`, so this crate has no dependency on the database
//! crate.

pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod gate;
pub mod invitation;
pub mod jobs;
pub mod lifecycle;
pub mod membership;
pub mod rbac;
pub mod secret;
pub mod tenant;

pub use config::AuthzConfig;
pub use credential::{IssuedCredential, NewSystemUser, RotatedCredential, SystemUserService};
pub use engine::PermissionEngine;
pub use error::AuthzError;
pub use gate::{TenantAccess, TenantAccessGate};
pub use invitation::{AcceptedInvitation, InvitationService, IssuedInvitation, NewInvitation};
pub use jobs::{
    ChannelJobQueue, Job, JobHandler, JobQueue, JobReceiver, JobWorker, LifecycleJobHandler,
    TenantInitJob,
};
pub use lifecycle::{
    HttpTenantInitializer, InitOutcome, TenantInitRequest, TenantInitializer,
    TenantLifecycleController,
};
pub use membership::MembershipService;
pub use rbac::{Actor, RbacService};
pub use tenant::{ManagedTenant, NewTenant, TenantService};
