// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared-secret authentication for the scheduler endpoints.

use crate::services::tasks::SCHEDULER_TOKEN_HEADER;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Constant-time comparison of a presented secret against the configured one.
///
/// An empty configured secret matches nothing.
pub fn token_matches(expected: &str, presented: Option<&str>) -> bool {
    match presented {
        Some(presented) if !expected.is_empty() => {
            presented.as_bytes().ct_eq(expected.as_bytes()).into()
        }
        _ => false,
    }
}

/// Require the scheduler token header on `/tasks/*` routes.
pub async fn require_scheduler_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(SCHEDULER_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());

    if !token_matches(&state.config.scheduler_token, presented) {
        tracing::warn!(
            path = %request.uri().path(),
            header_present = presented.is_some(),
            "Blocked tasks request with missing or wrong scheduler token"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}
