//! Error types for policy resolution and decisions.

use thiserror::Error;

use crate::locks::LockError;
use crate::store::PolicyStoreError;

/// Errors produced while resolving policies or rendering decisions.
#[derive(Debug, Error)]
pub enum AbacError {
    /// No flow granted the requested operation.
    #[error("Access denied: {operation} on {subject}: {reason}")]
    Denied {
        operation: String,
        subject: String,
        reason: String,
    },

    /// A policy document or override is malformed.
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// A collaborator (policy store, lock evaluator) could not be reached.
    #[error("Policy collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Result type for ABAC operations.
pub type Result<T> = std::result::Result<T, AbacError>;

impl From<PolicyStoreError> for AbacError {
    fn from(err: PolicyStoreError) -> Self {
        match err {
            PolicyStoreError::Unavailable(msg) => AbacError::Unavailable(msg),
            PolicyStoreError::InvalidOverride(msg) => AbacError::InvalidPolicy(msg),
        }
    }
}

impl From<LockError> for AbacError {
    /// Only connectivity failures surface as `Unavailable`; every other lock
    /// failure is a denial.
    fn from(err: LockError) -> Self {
        match err {
            LockError::Unavailable(msg) => AbacError::Unavailable(msg),
            other => AbacError::Denied {
                operation: "evaluate".to_string(),
                subject: "lock".to_string(),
                reason: other.to_string(),
            },
        }
    }
}
