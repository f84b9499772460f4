//! Error types for the store layer

use capstan_core::domain::ExecutionType;
use thiserror::Error;

/// Errors raised by a key-value backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An operation was applied to a key holding a different structure.
    #[error("wrong type for key '{key}': expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
    },

    /// Backend-specific failure (connectivity, I/O, ...). Retry policy for
    /// transient unavailability belongs to the store driver, not this layer.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors raised by the execution repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No execution stored under the given id.
    #[error("no {execution_type} found for {id}")]
    NotFound {
        execution_type: ExecutionType,
        id: String,
    },

    /// No execution found for any type, or by a secondary lookup key.
    #[error("no execution found {0}")]
    NotFoundAny(String),

    /// A lifecycle transition was requested from a state that does not
    /// allow it.
    #[error("{0}")]
    InvalidState(String),

    /// The requested operation is not valid for the given input.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A stored record could not be serialized or deserialized. Fatal for
    /// that single execution or stage.
    #[error(
        "failed (de)serializing execution, executionId: {execution_id}{}: {detail}",
        .stage_id.as_ref().map(|s| format!(", stageId: {}", s)).unwrap_or_default()
    )]
    Serialization {
        execution_id: String,
        stage_id: Option<String>,
        detail: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepositoryError {
    pub fn not_found(execution_type: ExecutionType, id: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            execution_type,
            id: id.into(),
        }
    }

    pub fn serialization(
        execution_id: impl Into<String>,
        stage_id: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        RepositoryError::Serialization {
            execution_id: execution_id.into(),
            stage_id,
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepositoryError::NotFound { .. } | RepositoryError::NotFoundAny(_)
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;
