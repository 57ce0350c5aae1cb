//! Error types for the IDM core SDK.

use idmcore_abac::AbacError;
use idmcore_storage::StorageError;
use idmcore_types::TypesError;
use thiserror::Error;

use crate::schema::SchemaViolation;

/// Errors returned by every public operation. Each variant maps to a status
/// code for the binding layer.
#[derive(Debug, Error)]
pub enum IdmError {
    /// Malformed input: schema violation, bad attribute path, reserved key.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The policy denied the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The entity, group or attribute does not exist (or is withheld).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation does not apply to the current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A collaborator could not be reached. Retry rather than treat as a
    /// denial.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl IdmError {
    /// HTTP-style status code of this error.
    pub fn status_code(&self) -> u16 {
        match self {
            IdmError::Validation(_) => 400,
            IdmError::Forbidden(_) => 403,
            IdmError::NotFound(_) => 404,
            IdmError::Conflict(_) => 409,
            IdmError::Unavailable(_) => 503,
        }
    }
}

/// Result type for IDM core operations.
pub type Result<T> = std::result::Result<T, IdmError>;

impl From<StorageError> for IdmError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => IdmError::NotFound(err.to_string()),
            StorageError::AlreadyExists { .. } => IdmError::Conflict(err.to_string()),
            StorageError::Unavailable(msg) => IdmError::Unavailable(msg),
        }
    }
}

impl From<AbacError> for IdmError {
    fn from(err: AbacError) -> Self {
        match err {
            AbacError::Denied { .. } => IdmError::Forbidden(err.to_string()),
            AbacError::InvalidPolicy(msg) => IdmError::Validation(msg),
            AbacError::Unavailable(msg) => IdmError::Unavailable(msg),
        }
    }
}

impl From<TypesError> for IdmError {
    fn from(err: TypesError) -> Self {
        IdmError::Validation(err.to_string())
    }
}

impl From<Vec<SchemaViolation>> for IdmError {
    fn from(violations: Vec<SchemaViolation>) -> Self {
        let joined: Vec<String> = violations.iter().map(ToString::to_string).collect();
        IdmError::Validation(joined.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(IdmError::Validation(String::new()).status_code(), 400);
        assert_eq!(IdmError::Forbidden(String::new()).status_code(), 403);
        assert_eq!(IdmError::NotFound(String::new()).status_code(), 404);
        assert_eq!(IdmError::Conflict(String::new()).status_code(), 409);
        assert_eq!(IdmError::Unavailable(String::new()).status_code(), 503);
    }

    #[test]
    fn storage_errors_map_to_taxonomy() {
        let not_found = StorageError::NotFound {
            kind: "entity",
            key: "/sensor 999".to_string(),
        };
        assert_eq!(IdmError::from(not_found).status_code(), 404);

        let exists = StorageError::AlreadyExists {
            kind: "group",
            key: "friends".to_string(),
        };
        assert_eq!(IdmError::from(exists).status_code(), 409);

        let down = StorageError::Unavailable("connection refused".to_string());
        assert_eq!(IdmError::from(down).status_code(), 503);
    }

    #[test]
    fn abac_errors_map_to_taxonomy() {
        let denied = AbacError::Denied {
            operation: "delete".to_string(),
            subject: "/sensor 323".to_string(),
            reason: "no write flow satisfied".to_string(),
        };
        assert_eq!(IdmError::from(denied).status_code(), 403);
        assert_eq!(
            IdmError::from(AbacError::Unavailable("pap".to_string())).status_code(),
            503
        );
        assert_eq!(
            IdmError::from(AbacError::InvalidPolicy("bad".to_string())).status_code(),
            400
        );
    }
}
