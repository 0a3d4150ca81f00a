//! Bastion Database — SurrealDB connection management and repository
//! implementations.
//!
//! This crate provides:
//! - Connection setup with retry ([`connect`], [`DbConfig`], [`ping`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Error types ([`DbError`])
//! - `Surreal*Repository` implementations of the `bastion-core` traits

mod connection;
mod error;
pub mod repository;
mod schema;

pub use connection::{DbConfig, connect, ping};
pub use error::DbError;
pub use schema::{run_migrations, schema_v1};
