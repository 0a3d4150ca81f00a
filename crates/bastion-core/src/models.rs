//! Domain models for Bastion.
//!
//! These are the core types shared across all crates. Each model has a
//! `Create*` input and, where the entity is mutable, an `Update*` input
//! whose fields are all optional.

pub mod invitation;
pub mod membership;
pub mod permission;
pub mod platform_admin;
pub mod policy;
pub mod role;
pub mod system_user;
pub mod tenant;
