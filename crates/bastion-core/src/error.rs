//! Error types for the Bastion system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BastionError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    /// A state transition was refused because the entity is no longer in
    /// the state the caller expected.
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    /// Access denied. Never carries a reason so that a missing tenant and
    /// a missing membership look the same to the caller.
    #[error("Access denied")]
    Forbidden,

    /// A machine credential was presented and rejected.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Upstream service '{service}' failed: {reason}")]
    Upstream { service: String, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BastionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

pub type BastionResult<T> = Result<T, BastionError>;
