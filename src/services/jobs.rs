// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Job entry points invoked by the scheduler.
//!
//! Each job takes a named lock for its duration; a second trigger while it
//! runs is rejected with [`AppError::Conflict`]. Run-level failures are
//! logged and alerted before being returned to the caller.

use crate::db::{data_row_count, state_keys, tables, StateStore, TabularStore};
use crate::error::{AppError, AuthError};
use crate::services::aggregation::rebuild_monthly_aggregates;
use crate::services::alerts::Alerter;
use crate::services::aweber::ApiClient;
use crate::services::broadcasts::{BroadcastSync, BroadcastSyncOutcome};
use crate::services::subscribers::{ReconcileOutcome, SubscriberSync, SubscriberSyncOutcome};
use crate::services::tasks::{ContinuationPayload, TaskQueue};
use crate::services::tokens::TokenManager;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock names. Every job touching the subscriber table shares one lock.
pub mod locks {
    pub const BROADCASTS: &str = "broadcasts";
    pub const SUBSCRIBERS: &str = "subscribers";
}

/// Endpoint a broadcast continuation is delivered to.
pub const BROADCAST_CONTINUATION_ENDPOINT: &str = "/tasks/sync-broadcasts";

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastJobResult {
    #[serde(flatten)]
    pub outcome: BroadcastSyncOutcome,
    pub continuation_queued: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberJobResult {
    #[serde(flatten)]
    pub outcome: SubscriberSyncOutcome,
    /// Months written to the overview table (0 when the roster is empty)
    pub months_rebuilt: usize,
}

/// Diagnostics. Never includes secrets.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub credential_stored: bool,
    pub sync_cursor: Option<String>,
    pub last_processed_broadcast: Option<String>,
    pub broadcast_rows: usize,
    pub subscriber_rows: usize,
    pub monthly_rows: usize,
    pub running_jobs: Vec<String>,
}

/// Runs sync jobs against one account.
pub struct SyncJobs {
    api: ApiClient,
    tokens: TokenManager,
    store: Arc<dyn TabularStore>,
    state: Arc<dyn StateStore>,
    alerter: Alerter,
    tasks: Option<Arc<dyn TaskQueue>>,
    locks: DashMap<&'static str, Arc<Mutex<()>>>,
}

impl SyncJobs {
    pub fn new(
        api: ApiClient,
        tokens: TokenManager,
        store: Arc<dyn TabularStore>,
        state: Arc<dyn StateStore>,
        alerter: Alerter,
        tasks: Option<Arc<dyn TaskQueue>>,
    ) -> Self {
        Self {
            api,
            tokens,
            store,
            state,
            alerter,
            tasks,
            locks: DashMap::new(),
        }
    }

    fn try_lock(&self, name: &'static str) -> Result<OwnedMutexGuard<()>, AppError> {
        let lock = self.locks.entry(name).or_default().value().clone();
        lock.try_lock_owned().map_err(|_| {
            tracing::warn!(job = name, "Job already running, rejecting trigger");
            AppError::Conflict(format!("{name} job is already running"))
        })
    }

    /// Log and alert a failed run, then hand the result back.
    async fn report<T>(&self, job: &str, result: Result<T, AppError>) -> Result<T, AppError> {
        if let Err(e) = &result {
            tracing::error!(job, error = %e, "Sync job failed");

            // The token manager alerts on these itself.
            let already_alerted = matches!(
                e,
                AppError::Auth(
                    AuthError::Revoked
                        | AuthError::RefreshFailed { .. }
                        | AuthError::CorruptCredential(_)
                )
            );
            if !already_alerted {
                let mut body = format!("The {job} job failed: {e}");
                if job == "subscriber sync" {
                    body.push_str(
                        "\n\nIf this was the first load, the subscriber table is incomplete; \
                         trigger force-full-resync once the cause is fixed.",
                    );
                }
                self.alerter
                    .alert(&format!("aweber-sync: {job} failed"), &body)
                    .await;
            }
        }
        result
    }

    /// Token, account and lists for a run.
    async fn prepare(&self) -> Result<(String, String, Vec<String>), AppError> {
        let token = self.tokens.get_valid_token().await?;
        let account_id = self.api.account_id(&token).await?;
        let list_ids = self.api.list_ids(&account_id, &token).await?;
        tracing::debug!(account_id = %account_id, lists = list_ids.len(), "Resolved account");
        Ok((token, account_id, list_ids))
    }

    // ─── Broadcasts ──────────────────────────────────────────────

    /// Sync one batch of broadcasts, skipping `offset` already handled by the chain.
    pub async fn sync_broadcasts(&self, offset: usize) -> Result<BroadcastJobResult, AppError> {
        let _guard = self.try_lock(locks::BROADCASTS)?;
        let result = self.run_broadcasts(offset).await;
        self.report("broadcast sync", result).await
    }

    async fn run_broadcasts(&self, offset: usize) -> Result<BroadcastJobResult, AppError> {
        let (token, account_id, list_ids) = self.prepare().await?;
        let engine = BroadcastSync::new(self.api.clone(), self.store.clone(), self.state.clone());
        let outcome = engine
            .sync_broadcasts_from(
                &account_id,
                &list_ids,
                &token,
                self.api.settings().broadcast_batch_limit,
                offset,
            )
            .await?;

        let continuation_queued = match (outcome.resume_offset, &self.tasks) {
            (Some(next), Some(tasks)) => {
                let payload = ContinuationPayload {
                    source: locks::BROADCASTS.to_string(),
                    processed: outcome.processed,
                    offset: next,
                };
                match tasks
                    .queue_continuation(BROADCAST_CONTINUATION_ENDPOINT, &payload)
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, offset = next, "Failed to queue broadcast continuation");
                        false
                    }
                }
            }
            (Some(next), None) => {
                tracing::info!(offset = next, "No task queue configured; rest waits for the next schedule");
                false
            }
            (None, _) => false,
        };

        if let Some(newest) = &outcome.last_seen_candidate {
            if outcome.resume_offset.is_none() || continuation_queued {
                self.state
                    .set(state_keys::LAST_PROCESSED_BROADCAST, newest)
                    .await?;
            } else {
                tracing::info!("Batch cut short without a continuation; keeping previous stop point");
            }
        }

        Ok(BroadcastJobResult {
            outcome,
            continuation_queued,
        })
    }

    // ─── Subscribers ─────────────────────────────────────────────

    /// Bulk or incremental subscriber sync, then the monthly overview.
    pub async fn sync_subscribers(&self) -> Result<SubscriberJobResult, AppError> {
        let _guard = self.try_lock(locks::SUBSCRIBERS)?;
        let result = self.run_subscribers().await;
        self.report("subscriber sync", result).await
    }

    async fn run_subscribers(&self) -> Result<SubscriberJobResult, AppError> {
        let (token, account_id, list_ids) = self.prepare().await?;
        let engine = SubscriberSync::new(self.api.clone(), self.store.clone(), self.state.clone());
        let outcome = engine
            .sync_subscribers(&account_id, &list_ids, &token)
            .await?;

        let months_rebuilt =
            if data_row_count(self.store.as_ref(), tables::SUBSCRIBERS.name).await? > 0 {
                rebuild_monthly_aggregates(self.store.as_ref(), self.api.clock().now())
                    .await?
                    .len()
            } else {
                0
            };

        Ok(SubscriberJobResult {
            outcome,
            months_rebuilt,
        })
    }

    /// Mark subscribers the provider no longer returns.
    pub async fn reconcile_subscribers(&self) -> Result<ReconcileOutcome, AppError> {
        let _guard = self.try_lock(locks::SUBSCRIBERS)?;
        let result = async {
            let (token, account_id, list_ids) = self.prepare().await?;
            SubscriberSync::new(self.api.clone(), self.store.clone(), self.state.clone())
                .reconcile(&account_id, &list_ids, &token)
                .await
        }
        .await;
        self.report("subscriber reconciliation", result).await
    }

    /// Empty the subscriber table and cursor, then bulk load from scratch.
    pub async fn force_full_resync(&self) -> Result<SubscriberJobResult, AppError> {
        let _guard = self.try_lock(locks::SUBSCRIBERS)?;
        let result = async {
            self.store
                .clear_contents(tables::SUBSCRIBERS.name, 1)
                .await?;
            self.state.delete(state_keys::LAST_SYNC_TIMESTAMP).await?;
            tracing::info!("Cleared subscriber table and sync cursor");
            self.run_subscribers().await
        }
        .await;
        self.report("full subscriber resync", result).await
    }

    /// Forget the sync cursor; the next incremental pass uses the lookback.
    pub async fn reset_sync_cursor(&self) -> Result<(), AppError> {
        let _guard = self.try_lock(locks::SUBSCRIBERS)?;
        self.state.delete(state_keys::LAST_SYNC_TIMESTAMP).await?;
        tracing::info!("Sync cursor reset");
        Ok(())
    }

    /// Forget the stored credential.
    pub async fn reset_authorization(&self) -> Result<(), AppError> {
        self.tokens.reset().await
    }

    // ─── Diagnostics ─────────────────────────────────────────────

    pub async fn status(&self) -> Result<SyncStatus, AppError> {
        let mut running_jobs: Vec<String> = self
            .locks
            .iter()
            .filter(|entry| entry.value().try_lock().is_err())
            .map(|entry| entry.key().to_string())
            .collect();
        running_jobs.sort();

        Ok(SyncStatus {
            credential_stored: self.tokens.has_credential().await?,
            sync_cursor: self.state.get(state_keys::LAST_SYNC_TIMESTAMP).await?,
            last_processed_broadcast: self
                .state
                .get(state_keys::LAST_PROCESSED_BROADCAST)
                .await?,
            broadcast_rows: data_row_count(self.store.as_ref(), tables::BROADCASTS.name).await?,
            subscriber_rows: data_row_count(self.store.as_ref(), tables::SUBSCRIBERS.name).await?,
            monthly_rows: data_row_count(self.store.as_ref(), tables::MONTHLY_STATS.name).await?,
            running_jobs,
        })
    }
}
