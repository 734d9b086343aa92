// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! aweber-sync API server
//!
//! Runs AWeber sync jobs when the scheduler calls `/tasks/*`.

use aweber_sync::{
    clock::SystemClock,
    config::Config,
    db::FirestoreDb,
    services::{AlertSink, KmsService, LogAlertSink, TaskQueue, TasksService, WebhookAlertSink},
    AppState, Backends,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting aweber-sync");

    // Firestore backs both the tables and the state store
    let db = Arc::new(
        FirestoreDb::new(&config.gcp_project_id)
            .await
            .expect("Failed to connect to Firestore"),
    );

    let kms = KmsService::new(
        &config.gcp_project_id,
        &config.gcp_region,
        KmsService::CREDENTIAL_KEY_NAME,
    )
    .await
    .expect("Failed to initialize KMS service");

    let alerts: Arc<dyn AlertSink> = match &config.alert_webhook_url {
        Some(url) => {
            tracing::info!("Alerts go to webhook");
            Arc::new(WebhookAlertSink::new(reqwest::Client::new(), url.clone()))
        }
        None => {
            tracing::warn!("ALERT_WEBHOOK_URL not set; alerts are only logged");
            Arc::new(LogAlertSink)
        }
    };

    let tasks: Option<Arc<dyn TaskQueue>> = config.service_url.as_ref().map(|url| {
        tracing::info!(project = %config.gcp_project_id, "Cloud Tasks continuations enabled");
        Arc::new(TasksService::new(
            &config.gcp_project_id,
            &config.gcp_region,
            url,
            &config.scheduler_token,
        )) as Arc<dyn TaskQueue>
    });

    let port = config.port;
    let state = Arc::new(AppState::new(
        config,
        Backends {
            tables: db.clone(),
            state: db,
            kms,
            alerts,
            tasks,
        },
        Arc::new(SystemClock),
    ));

    // Build router
    let app = aweber_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aweber_sync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
