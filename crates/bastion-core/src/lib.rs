//! Bastion Core — domain models, errors and repository traits shared by
//! every Bastion crate.
//!
//! This crate performs no I/O. Storage backends implement the traits in
//! [`repository`]; services in `bastion-authz` are generic over them.

pub mod error;
pub mod models;
pub mod repository;

pub use error::{BastionError, BastionResult};
