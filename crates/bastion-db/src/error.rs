//! Database-specific error types and conversions.

use bastion_core::error::BastionError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid stored value: {0}")]
    Decode(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Unique constraint violated on {entity}")]
    Conflict { entity: String },

    #[error("Transaction aborted: {0}")]
    Aborted(String),
}

impl DbError {
    /// Classify a failed statement, surfacing unique-index violations as
    /// [`DbError::Conflict`].
    pub(crate) fn from_statement(entity: &str, err: surrealdb::Error) -> Self {
        let message = err.to_string();
        if is_unique_violation(&message) {
            DbError::Conflict {
                entity: entity.into(),
            }
        } else {
            DbError::Query(message)
        }
    }

    /// Classify a failed transaction. Anything that is not a unique-index
    /// violation means a guard rejected the current state.
    pub(crate) fn from_transaction(entity: &str, err: surrealdb::Error) -> Self {
        let message = err.to_string();
        if is_unique_violation(&message) {
            DbError::Conflict {
                entity: entity.into(),
            }
        } else {
            DbError::Aborted(message)
        }
    }

    pub(crate) fn not_found(entity: &str, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

fn is_unique_violation(message: &str) -> bool {
    message.contains("already contains")
}

impl From<DbError> for BastionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => BastionError::NotFound { entity, id },
            DbError::Conflict { entity } => BastionError::AlreadyExists { entity },
            DbError::Aborted(reason) => BastionError::Conflict { reason },
            other => BastionError::Database(other.to_string()),
        }
    }
}
