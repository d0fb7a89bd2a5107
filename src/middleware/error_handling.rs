// ============================================================================
// Error Handling - Structured Failure Responses
// ============================================================================
//
// Every failure carries a machine-readable kind plus a human-readable message.
//
// - validation      : malformed mapping, invalid identifier, limit exceeded
// - not_found       : missing count, mapping, connection or item
// - invalid_state   : transition attempted from the wrong state
// - conflict        : uniqueness guard hit (open count per warehouse, etc.)
// - external_system : ERP connect/query failure
//
// Database and internal errors are logged server-side and returned as a
// generic message. Partial failures are never errors; they are summaries.
//
// ============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External system error: {0}")]
    ExternalSystem(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid_state(expected: impl Into<String>, actual: impl std::fmt::Display) -> Self {
        AppError::InvalidState {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    /// Machine-readable failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::InvalidInput(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState { .. } => "invalid_state",
            AppError::Conflict(_) => "conflict",
            AppError::ExternalSystem(_) => "external_system",
            AppError::Unauthorized | AppError::Jwt(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState { .. } | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ExternalSystem(_) => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps a Postgres unique violation (SQLSTATE 23505) to `Conflict`, any
/// other database error passes through unchanged.
pub fn map_unique_violation(err: sqlx::Error, message: &str) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return AppError::Conflict(message.to_string());
        }
    }
    AppError::Database(err)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let body = match self {
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                json!({ "error": "Internal server error", "kind": kind, "status": status.as_u16() })
            }
            AppError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                json!({ "error": "Internal server error", "kind": kind, "status": status.as_u16() })
            }
            AppError::Jwt(ref e) => {
                tracing::warn!("JWT error: {:?}", e);
                json!({ "error": "Invalid token", "kind": kind, "status": status.as_u16() })
            }
            AppError::InvalidState { ref expected, ref actual } => json!({
                "error": self.to_string(),
                "kind": kind,
                "status": status.as_u16(),
                "expected": expected,
                "actual": actual,
            }),
            AppError::ExternalSystem(ref msg) => {
                tracing::warn!("External system failure: {}", msg);
                json!({ "error": self.to_string(), "kind": kind, "status": status.as_u16() })
            }
            other => json!({ "error": other.to_string(), "kind": kind, "status": status.as_u16() }),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::InvalidInput("x".into()).kind(), "validation");
        assert_eq!(AppError::NotFound("count".into()).kind(), "not_found");
        assert_eq!(AppError::invalid_state("ACTIVE", "DRAFT").kind(), "invalid_state");
        assert_eq!(AppError::ExternalSystem("down".into()).kind(), "external_system");
        assert_eq!(AppError::Conflict("dup".into()).kind(), "conflict");
    }

    #[test]
    fn test_invalid_state_message_names_both_states() {
        let err = AppError::invalid_state("ACTIVE", "ON_HOLD");
        assert_eq!(err.to_string(), "Invalid state: expected ACTIVE, found ON_HOLD");
    }

    #[test]
    fn test_status_codes() {
        let response = AppError::NotFound("count".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::invalid_state("COMPLETED", "CLOSED").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::ExternalSystem("timeout".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
