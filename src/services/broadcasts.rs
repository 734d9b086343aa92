// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Broadcast sync: fetch sent campaigns, derive metrics, upsert rows.
//!
//! Rows are kept in ascending sent-date order. A broadcast already in the
//! table is overwritten in place; a new one is inserted before the first
//! row that is not older than it.

use crate::db::{ensure_table, state_keys, tables, StateStore, TabularStore};
use crate::error::AppError;
use crate::models::broadcast::{self, extract_broadcast_id, BroadcastRecord};
use crate::services::aweber::ApiClient;
use crate::services::paginator::Paginator;
use crate::services::retry::retry_with_backoff;
use crate::time_utils;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Where a broadcast row was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated(usize),
    Inserted(usize),
}

/// Counters for one broadcast run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BroadcastSyncOutcome {
    /// Rows written (inserted + updated)
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Entries without an id, without stats, or that failed individually
    pub skipped: usize,
    /// Set when the batch limit stopped the run: offset to resume from
    pub resume_offset: Option<usize>,
    /// Newest broadcast id that may become the stop point for later runs.
    /// `None` when a broadcast in this run was listed but not written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_candidate: Option<String>,
}

/// Overwrite the row for `record.broadcast_id`, or insert it chronologically.
pub async fn upsert_broadcast(
    store: &dyn TabularStore,
    record: &BroadcastRecord,
) -> Result<UpsertOutcome, AppError> {
    let table = tables::BROADCASTS.name;
    let rows = store.read_all_rows(table).await?;
    let row = record.to_row();

    let existing = rows.iter().enumerate().skip(1).find_map(|(i, r)| {
        (r.get(broadcast::ID_COLUMN).map(|c| c.trim()) == Some(record.broadcast_id.as_str()))
            .then_some(i)
    });
    if let Some(index) = existing {
        store.write_range(table, index, 0, &[row]).await?;
        tracing::debug!(broadcast_id = %record.broadcast_id, row = index, "Updated broadcast row");
        return Ok(UpsertOutcome::Updated(index));
    }

    // Rows whose date does not parse are skipped over, never compared.
    let index = rows
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(i, r)| {
            r.get(broadcast::DATE_COLUMN)
                .and_then(|cell| time_utils::parse_cell_timestamp(cell))
                .filter(|date| record.sent_date <= *date)
                .map(|_| i)
        })
        .unwrap_or(rows.len().max(1));

    store.insert_row(table, index, row).await?;
    tracing::debug!(broadcast_id = %record.broadcast_id, row = index, "Inserted broadcast row");
    Ok(UpsertOutcome::Inserted(index))
}

/// Broadcast sync engine.
pub struct BroadcastSync {
    api: ApiClient,
    store: Arc<dyn TabularStore>,
    state: Arc<dyn StateStore>,
}

impl BroadcastSync {
    pub fn new(api: ApiClient, store: Arc<dyn TabularStore>, state: Arc<dyn StateStore>) -> Self {
        Self { api, store, state }
    }

    /// Sync up to `batch_limit` broadcasts, newest first.
    pub async fn sync_broadcasts(
        &self,
        account_id: &str,
        list_ids: &[String],
        token: &str,
        batch_limit: usize,
    ) -> Result<BroadcastSyncOutcome, AppError> {
        self.sync_broadcasts_from(account_id, list_ids, token, batch_limit, 0)
            .await
    }

    /// Like [`sync_broadcasts`](Self::sync_broadcasts), skipping the first
    /// `offset` distinct broadcasts that an earlier run in the chain handled.
    pub async fn sync_broadcasts_from(
        &self,
        account_id: &str,
        list_ids: &[String],
        token: &str,
        batch_limit: usize,
        offset: usize,
    ) -> Result<BroadcastSyncOutcome, AppError> {
        ensure_table(self.store.as_ref(), tables::BROADCASTS).await?;

        let settings = self.api.settings();
        let sentinel = if settings.broadcast_stop_at_last_seen && offset == 0 {
            self.state.get(state_keys::LAST_PROCESSED_BROADCAST).await?
        } else {
            None
        };

        let mut outcome = BroadcastSyncOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut newest_id: Option<String> = None;
        let mut limit_hit = false;
        // Cleared when any listed broadcast is left unwritten.
        let mut complete = true;
        let listing_cap = offset + batch_limit.saturating_mul(2);

        'lists: for list_id in list_ids {
            let url = self.api.broadcasts_url(account_id, list_id)?;
            let mut pages = Paginator::new(&self.api, url, token, settings.broadcast_page_delay)
                .max_items(listing_cap);
            let mut listed = 0;
            if let Some(sentinel) = &sentinel {
                pages = pages.stop_at_id(sentinel.clone(), extract_broadcast_id);
            }

            loop {
                let page = match pages.next_page().await {
                    Ok(Some(page)) => page,
                    Ok(None) => break,
                    Err(e) if e.is_run_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(list_id = %list_id, error = %e, "Broadcast listing failed, skipping list");
                        complete = false;
                        break;
                    }
                };
                listed += page.len();

                for entry in page {
                    if outcome.processed >= batch_limit {
                        limit_hit = true;
                        break 'lists;
                    }

                    let Some(broadcast_id) = extract_broadcast_id(&entry) else {
                        tracing::debug!(list_id = %list_id, "Broadcast entry without id");
                        outcome.skipped += 1;
                        continue;
                    };
                    if newest_id.is_none() {
                        newest_id = Some(broadcast_id.clone());
                    }
                    if !seen.insert(broadcast_id.clone()) {
                        continue;
                    }
                    if seen.len() <= offset {
                        continue;
                    }

                    match self
                        .process_entry(account_id, list_id, &broadcast_id, &entry, token)
                        .await
                    {
                        Ok(Some(written)) => {
                            outcome.processed += 1;
                            match written {
                                UpsertOutcome::Inserted(_) => outcome.inserted += 1,
                                UpsertOutcome::Updated(_) => outcome.updated += 1,
                            }
                            self.api.clock().sleep(settings.broadcast_write_delay).await;
                        }
                        Ok(None) => {
                            outcome.skipped += 1;
                            complete = false;
                        }
                        Err(e) if e.is_run_fatal() => return Err(e),
                        Err(e) => {
                            tracing::warn!(
                                list_id = %list_id,
                                broadcast_id = %broadcast_id,
                                error = %e,
                                "Failed to process broadcast"
                            );
                            outcome.skipped += 1;
                            complete = false;
                        }
                    }
                }
            }

            if listed >= listing_cap {
                tracing::debug!(list_id = %list_id, "Broadcast listing capped before the end");
                complete = false;
            }
        }

        if limit_hit {
            outcome.resume_offset = Some(seen.len());
            tracing::info!(
                processed = outcome.processed,
                resume_offset = ?outcome.resume_offset,
                "Broadcast batch limit reached"
            );
        }

        if settings.broadcast_stop_at_last_seen && offset == 0 {
            if complete {
                outcome.last_seen_candidate = newest_id;
            } else {
                tracing::info!("Broadcasts left unsynced; keeping previous stop point");
            }
        }

        tracing::info!(
            account_id,
            processed = outcome.processed,
            inserted = outcome.inserted,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "Broadcast sync finished"
        );
        Ok(outcome)
    }

    /// Fetch detail, derive the record and upsert it. `None` when there are no stats.
    async fn process_entry(
        &self,
        account_id: &str,
        list_id: &str,
        broadcast_id: &str,
        entry: &Value,
        token: &str,
    ) -> Result<Option<UpsertOutcome>, AppError> {
        let settings = self.api.settings();
        let detail = retry_with_backoff(
            self.api.clock(),
            settings.detail_retry_attempts,
            settings.detail_retry_base_delay,
            |_| self.api.broadcast_detail(account_id, list_id, broadcast_id, token),
        )
        .await?;

        let Some(record) = BroadcastRecord::from_detail(
            broadcast_id.to_string(),
            entry,
            &detail,
            &settings.broadcast_audience,
        ) else {
            tracing::debug!(broadcast_id, "Broadcast has no stats or date; skipping");
            return Ok(None);
        };

        upsert_broadcast(self.store.as_ref(), &record).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, day: u32) -> BroadcastRecord {
        BroadcastRecord {
            sent_date: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            broadcast_id: id.to_string(),
            audience: "all".into(),
            subject: format!("Issue {id}"),
            total_sent: 100,
            delivered_count: 100,
            delivered_pct: 100.0,
            total_unique_opens: 0,
            opens_pct: 0.0,
            clicks: 0,
            clicks_pct: 0.0,
            complaint_count: 0,
            complaint_pct: 0.0,
            undelivered_count: 0,
            undelivered_pct: 0.0,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        ensure_table(&store, tables::BROADCASTS).await.unwrap();
        store
    }

    fn ids(store: &MemoryStore) -> Vec<String> {
        store
            .rows(tables::BROADCASTS.name)
            .iter()
            .skip(1)
            .map(|r| r[1].clone())
            .collect()
    }

    #[tokio::test]
    async fn inserts_keep_ascending_order() {
        let store = seeded().await;

        upsert_broadcast(&store, &record("b", 10)).await.unwrap();
        upsert_broadcast(&store, &record("d", 20)).await.unwrap();
        upsert_broadcast(&store, &record("a", 5)).await.unwrap();
        let outcome = upsert_broadcast(&store, &record("c", 15)).await.unwrap();
        upsert_broadcast(&store, &record("e", 25)).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::Inserted(3));
        assert_eq!(ids(&store), vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_last_write_wins() {
        let store = seeded().await;

        upsert_broadcast(&store, &record("a", 5)).await.unwrap();
        let mut changed = record("a", 5);
        changed.total_unique_opens = 42;
        let outcome = upsert_broadcast(&store, &changed).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::Updated(1));
        let rows = store.rows(tables::BROADCASTS.name);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], changed.to_row());
    }

    #[tokio::test]
    async fn unparsable_dates_are_passed_over() {
        let store = seeded().await;
        let mut junk = record("x", 1).to_row();
        junk[0] = "sometime".into();
        store.append_row(tables::BROADCASTS.name, junk).await.unwrap();
        upsert_broadcast(&store, &record("late", 28)).await.unwrap();

        upsert_broadcast(&store, &record("mid", 10)).await.unwrap();

        assert_eq!(ids(&store), vec!["x", "mid", "late"]);
    }

    #[tokio::test]
    async fn equal_dates_insert_before_existing() {
        let store = seeded().await;
        upsert_broadcast(&store, &record("first", 10)).await.unwrap();

        let outcome = upsert_broadcast(&store, &record("second", 10)).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::Inserted(1));
        assert_eq!(ids(&store), vec!["second", "first"]);
    }
}
