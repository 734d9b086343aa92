// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! aweber-sync: mirror AWeber broadcast and subscriber statistics into
//! tabular storage.
//!
//! The service exposes job endpoints for an external scheduler; each run
//! pulls from the AWeber REST API and merges into the tables.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use clock::Clock;
use config::Config;
use db::{StateStore, TabularStore};
use services::{AlertSink, Alerter, ApiClient, KmsService, SyncJobs, TaskQueue, TokenManager};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for every outbound HTTP request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// External systems the service talks to.
pub struct Backends {
    pub tables: Arc<dyn TabularStore>,
    pub state: Arc<dyn StateStore>,
    pub kms: KmsService,
    pub alerts: Arc<dyn AlertSink>,
    /// Continuation queue; `None` when no public service URL is configured
    pub tasks: Option<Arc<dyn TaskQueue>>,
}

/// Shared application state.
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: TokenManager,
    pub jobs: SyncJobs,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire the services together.
    pub fn new(config: Config, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        let alerter = Alerter::new(backends.alerts, clock.clone(), config.sync.alert_debounce);
        let tokens = TokenManager::new(
            http.clone(),
            config.clone(),
            backends.state.clone(),
            backends.kms,
            alerter.clone(),
            clock.clone(),
        );
        let api = ApiClient::new(
            http,
            &config.api_base_url,
            tokens.clone(),
            clock.clone(),
            Arc::new(config.sync.clone()),
        );
        let jobs = SyncJobs::new(
            api,
            tokens.clone(),
            backends.tables,
            backends.state,
            alerter,
            backends.tasks,
        );

        Self {
            config,
            tokens,
            jobs,
            clock,
        }
    }
}
