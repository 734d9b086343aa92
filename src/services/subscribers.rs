// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscriber sync: first-run bulk load, incremental merge, reconciliation.
//!
//! The mode is picked from the table contents: an empty table gets a bulk
//! load, anything else an incremental pass from the stored cursor.
//! Reconciliation is only run on request.

use crate::db::{ensure_table, state_keys, tables, Row, StateStore, TabularStore};
use crate::error::AppError;
use crate::models::subscriber::{manual_delete_marker, ApiSubscriber, SubscriberRecord};
use crate::services::aweber::{id_to_string, ApiClient};
use crate::services::paginator::Paginator;
use crate::time_utils;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Column of `Unsubscribed At` in the subscriber table.
const UNSUBSCRIBED_COLUMN: usize = 2;

/// Which pass a subscriber sync ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberSyncMode {
    FirstRun,
    Incremental,
}

/// Counters for one subscriber sync.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubscriberSyncOutcome {
    pub mode: SubscriberSyncMode,
    /// Distinct subscribers returned by the provider
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Cursor stored at the end of the run
    pub cursor: String,
}

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub remote_ids: usize,
    pub local_rows: usize,
    /// Local ids absent from every list
    pub missing: usize,
    /// Missing rows that received a manual-delete marker
    pub marked: usize,
}

/// Cursor to use for an incremental pass.
///
/// Falls back to `now - lookback` when the stored value is absent, does not
/// parse, predates 2001 or lies in the future.
pub fn effective_cursor(
    stored: Option<&str>,
    now: DateTime<Utc>,
    lookback: chrono::Duration,
) -> DateTime<Utc> {
    let floor = Utc
        .with_ymd_and_hms(2001, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let parsed = stored
        .and_then(time_utils::parse_cell_timestamp)
        .filter(|cursor| *cursor >= floor && *cursor <= now);

    match parsed {
        Some(cursor) => cursor,
        None => {
            if let Some(raw) = stored {
                tracing::warn!(cursor = raw, "Stored sync cursor is implausible; using lookback");
            }
            now - lookback
        }
    }
}

fn parse_entry(entry: &Value) -> Option<SubscriberRecord> {
    let sub: ApiSubscriber = match serde_json::from_value(entry.clone()) {
        Ok(sub) => sub,
        Err(e) => {
            tracing::debug!(error = %e, "Subscriber entry does not parse");
            return None;
        }
    };
    SubscriberRecord::from_api(&sub)
}

/// Subscriber sync engine.
pub struct SubscriberSync {
    api: ApiClient,
    store: Arc<dyn TabularStore>,
    state: Arc<dyn StateStore>,
}

impl SubscriberSync {
    pub fn new(api: ApiClient, store: Arc<dyn TabularStore>, state: Arc<dyn StateStore>) -> Self {
        Self { api, store, state }
    }

    /// Bulk load into an empty table, otherwise merge changes since the cursor.
    pub async fn sync_subscribers(
        &self,
        account_id: &str,
        list_ids: &[String],
        token: &str,
    ) -> Result<SubscriberSyncOutcome, AppError> {
        ensure_table(self.store.as_ref(), tables::SUBSCRIBERS).await?;
        let run_start = self.api.clock().now();
        let rows = self.store.read_all_rows(tables::SUBSCRIBERS.name).await?;

        if rows.len() <= 1 {
            self.bulk_load(account_id, list_ids, token, run_start).await
        } else {
            self.incremental(account_id, list_ids, token, rows, run_start)
                .await
        }
    }

    async fn bulk_load(
        &self,
        account_id: &str,
        list_ids: &[String],
        token: &str,
        run_start: DateTime<Utc>,
    ) -> Result<SubscriberSyncOutcome, AppError> {
        let settings = self.api.settings();
        tracing::info!(account_id, lists = list_ids.len(), "Subscriber table empty, starting bulk load");

        let mut writer = BatchWriter::new(self, 1);
        let mut seen: HashSet<String> = HashSet::new();

        for list_id in list_ids {
            let url = self.api.subscribers_url(
                account_id,
                list_id,
                settings.subscriber_page_size,
                None,
                false,
            )?;
            let mut pages = Paginator::new(&self.api, url, token, settings.bulk_page_delay);

            while let Some(page) = pages.next_page().await? {
                for record in page.iter().filter_map(parse_entry) {
                    if seen.insert(record.subscriber_id.clone()) {
                        writer.push(record.to_row()).await?;
                    }
                }
            }
            tracing::debug!(list_id = %list_id, pages = pages.pages_fetched(), "Bulk-loaded list");
        }
        writer.flush().await?;

        let cursor = time_utils::format_utc_rfc3339(run_start);
        self.state.set(state_keys::LAST_SYNC_TIMESTAMP, &cursor).await?;

        tracing::info!(account_id, inserted = writer.written, "Subscriber bulk load finished");
        Ok(SubscriberSyncOutcome {
            mode: SubscriberSyncMode::FirstRun,
            fetched: seen.len(),
            inserted: writer.written,
            updated: 0,
            unchanged: 0,
            cursor,
        })
    }

    async fn incremental(
        &self,
        account_id: &str,
        list_ids: &[String],
        token: &str,
        rows: Vec<Row>,
        run_start: DateTime<Utc>,
    ) -> Result<SubscriberSyncOutcome, AppError> {
        let settings = self.api.settings();
        let stored = self.state.get(state_keys::LAST_SYNC_TIMESTAMP).await?;
        let since = effective_cursor(stored.as_deref(), run_start, settings.default_lookback);
        tracing::info!(account_id, since = %since, "Starting incremental subscriber sync");

        let snapshot: HashMap<String, (usize, SubscriberRecord)> = rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, row)| SubscriberRecord::from_row(row).map(|r| (i, r)))
            .map(|(i, r)| (r.subscriber_id.clone(), (i, r)))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut updates: Vec<(usize, Row)> = Vec::new();
        let mut inserts: Vec<Row> = Vec::new();
        let mut unchanged = 0;
        let mut fetch_error = None;

        'lists: for list_id in list_ids {
            let url = self.api.subscribers_url(
                account_id,
                list_id,
                settings.subscriber_page_size,
                Some(since),
                false,
            )?;
            let mut pages = Paginator::new(&self.api, url, token, settings.incremental_page_delay);

            loop {
                let page = match pages.next_page().await {
                    Ok(Some(page)) => page,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(list_id = %list_id, error = %e, "Subscriber listing failed");
                        fetch_error = Some(e);
                        break 'lists;
                    }
                };

                for record in page.iter().filter_map(parse_entry) {
                    if !seen.insert(record.subscriber_id.clone()) {
                        continue;
                    }
                    match snapshot.get(&record.subscriber_id) {
                        Some((index, existing)) => {
                            if existing.unsubscribed_at != record.unsubscribed_at {
                                updates.push((*index, record.to_row()));
                            } else {
                                unchanged += 1;
                            }
                        }
                        None => inserts.push(record.to_row()),
                    }
                }
            }
        }

        // Whatever was fetched is applied even if a list failed; the merge
        // converges on the next run.
        self.apply_updates(&updates).await?;
        let mut writer = BatchWriter::new(self, rows.len());
        for row in inserts {
            writer.push(row).await?;
        }
        writer.flush().await?;

        if let Some(e) = fetch_error {
            return Err(e);
        }

        let cursor = time_utils::format_utc_rfc3339(run_start);
        self.state.set(state_keys::LAST_SYNC_TIMESTAMP, &cursor).await?;

        tracing::info!(
            account_id,
            fetched = seen.len(),
            inserted = writer.written,
            updated = updates.len(),
            unchanged,
            "Incremental subscriber sync finished"
        );
        Ok(SubscriberSyncOutcome {
            mode: SubscriberSyncMode::Incremental,
            fetched: seen.len(),
            inserted: writer.written,
            updated: updates.len(),
            unchanged,
            cursor,
        })
    }

    /// Overwrite scattered rows, pausing between batches.
    async fn apply_updates(&self, updates: &[(usize, Row)]) -> Result<(), AppError> {
        let settings = self.api.settings();
        for (n, batch) in updates.chunks(settings.write_batch_size.max(1)).enumerate() {
            if n > 0 {
                self.api.clock().sleep(settings.write_batch_delay).await;
            }
            for (index, row) in batch {
                self.store
                    .write_range(tables::SUBSCRIBERS.name, *index, 0, std::slice::from_ref(row))
                    .await?;
            }
        }
        Ok(())
    }

    /// Mark local subscribers that no list returns any more.
    ///
    /// Rows are never removed. A row already carrying an unsubscribe time is
    /// counted as missing but left as is.
    pub async fn reconcile(
        &self,
        account_id: &str,
        list_ids: &[String],
        token: &str,
    ) -> Result<ReconcileOutcome, AppError> {
        let settings = self.api.settings();
        ensure_table(self.store.as_ref(), tables::SUBSCRIBERS).await?;

        let mut remote: HashSet<String> = HashSet::new();
        for list_id in list_ids {
            let url = self.api.subscribers_url(
                account_id,
                list_id,
                settings.reconcile_page_size,
                None,
                true,
            )?;
            let mut pages = Paginator::new(&self.api, url, token, settings.incremental_page_delay);
            while let Some(page) = pages.next_page().await? {
                remote.extend(
                    page.iter()
                        .filter_map(|entry| entry.get("id").and_then(id_to_string)),
                );
            }
            if pages.hit_malformed_page() {
                return Err(AppError::Parse(format!(
                    "subscriber ids of list {list_id} could not be read completely"
                )));
            }
        }

        let rows = self.store.read_all_rows(tables::SUBSCRIBERS.name).await?;
        let mut outcome = ReconcileOutcome {
            remote_ids: remote.len(),
            local_rows: rows.len().saturating_sub(1),
            ..Default::default()
        };

        if remote.is_empty() && outcome.local_rows > 0 {
            tracing::warn!(account_id, "Provider returned no subscriber ids; not marking anything");
            return Ok(outcome);
        }

        let marker = manual_delete_marker(self.api.clock().now());
        let mut marks: Vec<usize> = Vec::new();
        for (index, row) in rows.iter().enumerate().skip(1) {
            let Some(record) = SubscriberRecord::from_row(row) else {
                continue;
            };
            if remote.contains(&record.subscriber_id) {
                continue;
            }
            outcome.missing += 1;
            if record.unsubscribed_at.trim().is_empty() {
                marks.push(index);
            }
        }

        for (n, batch) in marks.chunks(settings.write_batch_size.max(1)).enumerate() {
            if n > 0 {
                self.api.clock().sleep(settings.write_batch_delay).await;
            }
            for index in batch {
                self.store
                    .write_range(
                        tables::SUBSCRIBERS.name,
                        *index,
                        UNSUBSCRIBED_COLUMN,
                        &[vec![marker.clone()]],
                    )
                    .await?;
                outcome.marked += 1;
            }
        }

        tracing::info!(
            account_id,
            remote_ids = outcome.remote_ids,
            local_rows = outcome.local_rows,
            missing = outcome.missing,
            marked = outcome.marked,
            "Subscriber reconciliation finished"
        );
        Ok(outcome)
    }
}

/// Appends rows contiguously in fixed-size batches with a pause between them.
struct BatchWriter<'a> {
    sync: &'a SubscriberSync,
    next_row: usize,
    pending: Vec<Row>,
    batches: usize,
    written: usize,
}

impl<'a> BatchWriter<'a> {
    fn new(sync: &'a SubscriberSync, next_row: usize) -> Self {
        Self {
            sync,
            next_row,
            pending: Vec::new(),
            batches: 0,
            written: 0,
        }
    }

    async fn push(&mut self, row: Row) -> Result<(), AppError> {
        self.pending.push(row);
        if self.pending.len() >= self.sync.api.settings().write_batch_size.max(1) {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AppError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.batches > 0 {
            let delay = self.sync.api.settings().write_batch_delay;
            self.sync.api.clock().sleep(delay).await;
        }
        let batch = std::mem::take(&mut self.pending);
        self.sync
            .store
            .write_range(tables::SUBSCRIBERS.name, self.next_row, 0, &batch)
            .await?;
        tracing::debug!(row = self.next_row, count = batch.len(), "Wrote subscriber batch");
        self.next_row += batch.len();
        self.written += batch.len();
        self.batches += 1;
        Ok(())
    }
}
