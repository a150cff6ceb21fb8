/// Unified error types for the entitlement engine
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quota::{ResourceKind, TierId};

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed caller identity
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Caller lacks the role required for the operation
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic missing entity (user, entitlement, resource)
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Activation code not found: {0}")]
    CodeNotFound(String),

    #[error("Activation code has been disabled")]
    CodeDisabled,

    #[error("Activation code has expired")]
    CodeExpired,

    #[error("Activation code has no uses remaining")]
    CodeExhausted,

    /// The caller's grant from this code was deactivated by an administrator
    #[error("Access granted by this code has been revoked")]
    EntitlementRevoked,

    /// Creation denied by the resolved tier limit
    #[error("{message}")]
    QuotaExceeded {
        kind: ResourceKind,
        tier: TierId,
        limit: i64,
        current: i64,
        message: String,
    },

    /// Lost a race on an atomic increment or reservation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    PolicyDenied,
    Conflict,
    Validation,
    Authentication,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) | EngineError::CodeNotFound(_) => ErrorKind::NotFound,
            EngineError::CodeDisabled
            | EngineError::CodeExpired
            | EngineError::CodeExhausted
            | EngineError::EntitlementRevoked
            | EngineError::QuotaExceeded { .. }
            | EngineError::Authorization(_) => ErrorKind::PolicyDenied,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Authentication(_) => ErrorKind::Authentication,
            EngineError::Database(_) | EngineError::Io(_) | EngineError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only a lost race may be retried, and only by re-running the whole operation.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    fn error_code(&self) -> &'static str {
        match self {
            EngineError::Authentication(_) => "AuthenticationRequired",
            EngineError::Authorization(_) => "Forbidden",
            EngineError::Validation(_) => "InvalidRequest",
            EngineError::NotFound(_) => "NotFound",
            EngineError::CodeNotFound(_) => "CodeNotFound",
            EngineError::CodeDisabled => "CodeDisabled",
            EngineError::CodeExpired => "CodeExpired",
            EngineError::CodeExhausted => "CodeExhausted",
            EngineError::EntitlementRevoked => "EntitlementRevoked",
            EngineError::QuotaExceeded { .. } => "QuotaExceeded",
            EngineError::Conflict(_) => "Conflict",
            EngineError::Database(_) | EngineError::Io(_) | EngineError::Internal(_) => {
                "InternalServerError"
            }
        }
    }
}

/// SQLite reports lock contention as SQLITE_BUSY (5) or SQLITE_LOCKED (6),
/// optionally with an extended code in the high bits.
fn is_lock_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if is_lock_contention(&err) {
            EngineError::Conflict(format!("store contention: {}", err))
        } else {
            EngineError::Database(err)
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert EngineError to HTTP response
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PolicyDenied => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match self.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %self, "request failed");
                "Internal server error".to_string() // Don't leak details
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: self.error_code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_denials_are_not_retryable() {
        assert_eq!(EngineError::CodeExhausted.kind(), ErrorKind::PolicyDenied);
        assert_eq!(EngineError::CodeExpired.kind(), ErrorKind::PolicyDenied);
        assert!(!EngineError::CodeDisabled.is_retryable());
        assert!(!EngineError::Validation("bad".into()).is_retryable());
        assert!(EngineError::Conflict("raced".into()).is_retryable());
    }

    #[test]
    fn test_quota_message_is_displayed_verbatim() {
        let err = EngineError::QuotaExceeded {
            kind: ResourceKind::Products,
            tier: TierId::Free,
            limit: 1,
            current: 1,
            message: "limit reached".to_string(),
        };
        assert_eq!(err.to_string(), "limit reached");
        assert_eq!(err.kind(), ErrorKind::PolicyDenied);
    }

    #[test]
    fn test_pool_timeout_is_conflict() {
        let err: EngineError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());

        let err: EngineError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
