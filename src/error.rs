// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Outcomes of the token lifecycle that are not a usable access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No stored AWeber credential; authorization required")]
    MissingCredential,

    #[error("Stored AWeber credential is unreadable: {0}")]
    CorruptCredential(String),

    #[error("AWeber rejected the refresh token (invalid_grant); re-authorization required")]
    Revoked,

    #[error("Token refresh failed with HTTP {status}: {body}")]
    RefreshFailed { status: u16, body: String },

    #[error("Token probe returned HTTP {status}")]
    ProbeFailed { status: u16 },

    #[error("Token endpoint request failed: {0}")]
    Transport(String),

    #[error("Credential storage failed: {0}")]
    Storage(String),
}

impl AuthError {
    /// Only manual re-authorization can clear this condition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthError::Revoked | AuthError::MissingCredential)
    }

    /// A later run may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::ProbeFailed { .. } | AuthError::Transport(_) | AuthError::Storage(_)
        )
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("AWeber API error: HTTP {status}: {body}")]
    AweberApi { status: u16, body: String },

    #[error("AWeber request failed: {0}")]
    Transport(String),

    #[error("AWeber rate limit persisted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Unexpected AWeber payload: {0}")]
    Parse(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether this error must halt the current run instead of skipping one item.
    ///
    /// Auth failures, exhausted rate-limit or 401 budgets, and store failures
    /// affect every remaining item, so continuing would only repeat them.
    pub fn is_run_fatal(&self) -> bool {
        match self {
            AppError::Auth(_)
            | AppError::RateLimited { .. }
            | AppError::Database(_)
            | AppError::Internal(_) => true,
            AppError::AweberApi { status, .. } => *status == 401,
            _ => false,
        }
    }

    /// Whether the provider reported the access token as expired or invalid.
    pub fn is_token_error(&self) -> bool {
        matches!(self, AppError::AweberApi { status: 401, .. })
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::AweberApi { .. } | AppError::Transport(_) | AppError::Parse(_) => {
                (StatusCode::BAD_GATEWAY, "aweber_error", Some(self.to_string()))
            }
            AppError::RateLimited { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "rate_limited",
                Some(self.to_string()),
            ),
            AppError::Auth(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "authorization_error",
                Some(err.to_string()),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_halt_the_run() {
        assert!(AppError::Auth(AuthError::Revoked).is_run_fatal());
        assert!(AppError::RateLimited { attempts: 5 }.is_run_fatal());
        assert!(AppError::Database("write failed".into()).is_run_fatal());
        assert!(AppError::AweberApi {
            status: 401,
            body: String::new()
        }
        .is_run_fatal());
    }

    #[test]
    fn item_errors_do_not_halt_the_run() {
        assert!(!AppError::Parse("missing stats".into()).is_run_fatal());
        assert!(!AppError::AweberApi {
            status: 404,
            body: "gone".into()
        }
        .is_run_fatal());
        assert!(!AppError::Transport("connection reset".into()).is_run_fatal());
    }

    #[test]
    fn terminal_and_transient_auth_errors_are_disjoint() {
        let all = [
            AuthError::MissingCredential,
            AuthError::CorruptCredential("bad json".into()),
            AuthError::Revoked,
            AuthError::RefreshFailed {
                status: 500,
                body: String::new(),
            },
            AuthError::ProbeFailed { status: 503 },
            AuthError::Transport("dns".into()),
            AuthError::Storage("unavailable".into()),
        ];
        for err in all {
            assert!(!(err.is_terminal() && err.is_transient()), "{err:?}");
        }
        assert!(AuthError::Revoked.is_terminal());
        assert!(AuthError::ProbeFailed { status: 503 }.is_transient());
    }
}
