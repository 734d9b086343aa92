// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Tasks continuations for sync jobs that stopped at a checkpoint.
//!
//! Uses the official google-cloud-tasks-v2 SDK.

use crate::error::AppError;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Cloud Tasks queue that carries sync continuations.
pub const SYNC_QUEUE_NAME: &str = "aweber-sync";

/// Header carrying the scheduler token on `/tasks/*` requests.
pub const SCHEDULER_TOKEN_HEADER: &str = "x-scheduler-token";

/// Body of a continuation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationPayload {
    /// Job that queued the continuation
    pub source: String,
    /// Items written by the run that stopped
    pub processed: usize,
    /// Distinct items already covered by the chain
    #[serde(default)]
    pub offset: usize,
}

/// Queues a follow-up invocation of a job endpoint.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn queue_continuation(&self, endpoint: &str, payload: &ContinuationPayload)
        -> Result<()>;
}

/// Cloud Tasks client wrapper.
pub struct TasksService {
    project_id: String,
    location: String,
    queue_name: String,
    service_url: String,
    scheduler_token: String,
}

impl TasksService {
    pub fn new(project_id: &str, region: &str, service_url: &str, scheduler_token: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: region.to_string(),
            queue_name: SYNC_QUEUE_NAME.to_string(),
            service_url: service_url.trim_end_matches('/').to_string(),
            scheduler_token: scheduler_token.to_string(),
        }
    }

    fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue_name
        )
    }
}

#[async_trait]
impl TaskQueue for TasksService {
    async fn queue_continuation(
        &self,
        endpoint: &str,
        payload: &ContinuationPayload,
    ) -> Result<()> {
        use google_cloud_tasks_v2::client::CloudTasks;
        use google_cloud_tasks_v2::model::{HttpRequest, OidcToken, Task};

        let client = CloudTasks::builder()
            .build()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks client error: {}", e)))?;

        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;

        let http_request = HttpRequest::default()
            .set_url(format!("{}{}", self.service_url, endpoint))
            .set_http_method("POST")
            .set_body(axum::body::Bytes::from(body))
            .set_headers(std::collections::HashMap::from([
                (
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                ),
                (
                    SCHEDULER_TOKEN_HEADER.to_string(),
                    self.scheduler_token.clone(),
                ),
            ]))
            .set_oidc_token(
                OidcToken::default()
                    .set_service_account_email(format!(
                        "aweber-sync@{}.iam.gserviceaccount.com",
                        self.project_id
                    ))
                    .set_audience(self.service_url.clone()),
            );

        let task = Task::default().set_http_request(http_request);

        let _response = client
            .create_task()
            .set_parent(self.queue_path())
            .set_task(task)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks create error: {}", e)))?;

        tracing::info!(
            endpoint,
            source = %payload.source,
            processed = payload.processed,
            offset = payload.offset,
            "Queued continuation task"
        );
        Ok(())
    }
}
