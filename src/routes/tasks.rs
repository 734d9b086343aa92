// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Job endpoints for the scheduler and Cloud Tasks continuations.
//!
//! Every route requires the scheduler token. Jobs run inside the request;
//! the response carries the run's counters.

use crate::error::{AppError, Result};
use crate::middleware::require_scheduler_token;
use crate::services::jobs::{BroadcastJobResult, SubscriberJobResult, SyncStatus};
use crate::services::subscribers::ReconcileOutcome;
use crate::services::tasks::ContinuationPayload;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Json, State},
    middleware,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Task routes, wrapped in scheduler-token authentication.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/sync-broadcasts", post(sync_broadcasts))
        .route("/tasks/sync-subscribers", post(sync_subscribers))
        .route("/tasks/reconcile-subscribers", post(reconcile_subscribers))
        .route("/tasks/reset-authorization", post(reset_authorization))
        .route("/tasks/reset-sync-cursor", post(reset_sync_cursor))
        .route("/tasks/force-full-resync", post(force_full_resync))
        .route("/tasks/status", get(status))
        .route_layer(middleware::from_fn_with_state(state, require_scheduler_token))
}

#[derive(Serialize)]
pub struct Ack {
    pub status: &'static str,
}

/// Scheduler triggers arrive with an empty body; continuations carry an offset.
fn continuation_offset(body: &[u8]) -> Result<usize> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(0);
    }
    let payload: ContinuationPayload = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid continuation payload: {e}")))?;
    tracing::info!(
        source = %payload.source,
        processed = payload.processed,
        offset = payload.offset,
        "Continuing broadcast sync"
    );
    Ok(payload.offset)
}

async fn sync_broadcasts(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<BroadcastJobResult>> {
    let offset = continuation_offset(&body)?;
    Ok(Json(state.jobs.sync_broadcasts(offset).await?))
}

async fn sync_subscribers(State(state): State<Arc<AppState>>) -> Result<Json<SubscriberJobResult>> {
    Ok(Json(state.jobs.sync_subscribers().await?))
}

async fn reconcile_subscribers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileOutcome>> {
    Ok(Json(state.jobs.reconcile_subscribers().await?))
}

async fn force_full_resync(State(state): State<Arc<AppState>>) -> Result<Json<SubscriberJobResult>> {
    Ok(Json(state.jobs.force_full_resync().await?))
}

async fn reset_authorization(State(state): State<Arc<AppState>>) -> Result<Json<Ack>> {
    state.jobs.reset_authorization().await?;
    Ok(Json(Ack { status: "ok" }))
}

async fn reset_sync_cursor(State(state): State<Arc<AppState>>) -> Result<Json<Ack>> {
    state.jobs.reset_sync_cursor().await?;
    Ok(Json(Ack { status: "ok" }))
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<SyncStatus>> {
    Ok(Json(state.jobs.status().await?))
}
