// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscriber jobs end to end: bulk load, incremental merge, cursor
//! handling, reconciliation and the monthly overview.

use aweber_sync::db::{state_keys, tables, Row, StateStore};
use aweber_sync::error::AppError;
use aweber_sync::services::subscribers::SubscriberSyncMode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::{collection, subscriber, Harness, ACCOUNT_ID};

fn subscribers_path(list_id: &str) -> String {
    format!("/1.0/accounts/{ACCOUNT_ID}/lists/{list_id}/subscribers")
}

/// Full listing (no `subscribed_since`, all fields).
async fn mount_full_listing(h: &Harness, list_id: &str, entries: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(subscribers_path(list_id)))
        .and(query_param("ws.op", "find"))
        .and(query_param_is_missing("subscribed_since"))
        .and(query_param_is_missing("fields"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection(entries, None)))
        .mount(&h.server)
        .await;
}

/// Listing filtered on `subscribed_since`.
async fn mount_since_listing(h: &Harness, list_id: &str, since: &str, entries: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(subscribers_path(list_id)))
        .and(query_param("subscribed_since", since))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection(entries, None)))
        .expect(1)
        .mount(&h.server)
        .await;
}

/// Id-only listing used by reconciliation.
async fn mount_id_listing(h: &Harness, list_id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(subscribers_path(list_id)))
        .and(query_param("fields", "id"))
        .and(query_param("ws.size", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&h.server)
        .await;
}

async fn ready(h: &Harness, lists: &[&str]) {
    h.seed_credential().await;
    h.mount_account().await;
    h.mount_lists(lists).await;
}

fn row(cells: &[&str]) -> Row {
    cells.iter().map(|c| c.to_string()).collect()
}

/// Subscriber table with the given data rows.
fn seed_roster(h: &Harness, data: &[&[&str]]) {
    let mut rows = vec![tables::SUBSCRIBERS.header_row()];
    rows.extend(data.iter().map(|cells| row(cells)));
    h.store.seed_table(tables::SUBSCRIBERS.name, rows);
}

async fn cursor(h: &Harness) -> Option<String> {
    h.store.get(state_keys::LAST_SYNC_TIMESTAMP).await.unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn first_run_bulk_loads_every_list_once() {
    let h = Harness::new().await;
    ready(&h, &["10", "20"]).await;
    mount_full_listing(
        &h,
        "10",
        vec![
            subscriber(1, "2024-01-10T08:00:00Z", None),
            subscriber(2, "2024-02-01T09:30:00Z", Some("2024-03-02T10:00:00Z")),
        ],
    )
    .await;
    mount_full_listing(
        &h,
        "20",
        vec![
            subscriber(2, "2024-02-01T09:30:00Z", Some("2024-03-02T10:00:00Z")),
            subscriber(3, "2024-03-05T00:00:00Z", None),
        ],
    )
    .await;

    let result = h.app_state().jobs.sync_subscribers().await.unwrap();

    assert_eq!(result.outcome.mode, SubscriberSyncMode::FirstRun);
    assert_eq!(result.outcome.fetched, 3);
    assert_eq!(result.outcome.inserted, 3);
    assert_eq!(result.outcome.cursor, "2024-03-15T12:00:00Z");
    assert_eq!(cursor(&h).await.as_deref(), Some("2024-03-15T12:00:00Z"));

    let rows = h.store.rows(tables::SUBSCRIBERS.name);
    assert_eq!(rows[0], tables::SUBSCRIBERS.header_row());
    assert_eq!(&rows[1..], &[
        row(&["1", "2024-01-10 08:00:00", ""]),
        row(&["2", "2024-02-01 09:30:00", "2024-03-02 10:00:00"]),
        row(&["3", "2024-03-05 00:00:00", ""]),
    ]);

    // January through March.
    assert_eq!(result.months_rebuilt, 3);
    let monthly = h.store.rows(tables::MONTHLY_STATS.name);
    assert_eq!(monthly.len(), 4);
    assert_eq!(&monthly[3][..3], &["2024", "March", "3"]);
    assert_eq!(monthly[3][6], "1");
}

#[tokio::test]
async fn bulk_load_writes_in_batches_with_pauses() {
    let mut h = Harness::new().await;
    h.config.sync.write_batch_size = 2;
    ready(&h, &["10"]).await;
    let entries = (1..=5)
        .map(|id| subscriber(id, "2024-03-01T00:00:00Z", None))
        .collect();
    mount_full_listing(&h, "10", entries).await;

    let result = h.app_state().jobs.sync_subscribers().await.unwrap();

    assert_eq!(result.outcome.inserted, 5);
    assert_eq!(h.store.rows(tables::SUBSCRIBERS.name).len(), 6);
    // Three batches, a pause before the second and third.
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1); 2]);
}

#[tokio::test]
async fn incremental_without_cursor_looks_back_one_day() {
    let h = Harness::new().await;
    ready(&h, &["10"]).await;
    seed_roster(&h, &[&["1", "2024-01-10 08:00:00", ""], &["2", "2024-02-01 09:30:00", ""]]);
    mount_since_listing(
        &h,
        "10",
        "2024-03-14T12:00:00Z",
        vec![
            subscriber(1, "2024-01-10T08:00:00Z", Some("2024-03-14T18:00:00Z")),
            subscriber(2, "2024-02-01T09:30:00Z", None),
            subscriber(9, "2024-03-15T06:00:00Z", None),
        ],
    )
    .await;

    let result = h.app_state().jobs.sync_subscribers().await.unwrap();

    assert_eq!(result.outcome.mode, SubscriberSyncMode::Incremental);
    assert_eq!(result.outcome.updated, 1);
    assert_eq!(result.outcome.inserted, 1);
    assert_eq!(result.outcome.unchanged, 1);
    assert_eq!(&h.store.rows(tables::SUBSCRIBERS.name)[1..], &[
        row(&["1", "2024-01-10 08:00:00", "2024-03-14 18:00:00"]),
        row(&["2", "2024-02-01 09:30:00", ""]),
        row(&["9", "2024-03-15 06:00:00", ""]),
    ]);
    assert_eq!(cursor(&h).await.as_deref(), Some("2024-03-15T12:00:00Z"));
}

#[tokio::test]
async fn incremental_uses_stored_cursor() {
    let h = Harness::new().await;
    ready(&h, &["10"]).await;
    seed_roster(&h, &[&["1", "2024-01-10 08:00:00", ""]]);
    h.store
        .set(state_keys::LAST_SYNC_TIMESTAMP, "2024-03-10T00:00:00Z")
        .await
        .unwrap();
    mount_since_listing(&h, "10", "2024-03-10T00:00:00Z", vec![]).await;

    let result = h.app_state().jobs.sync_subscribers().await.unwrap();

    assert_eq!(result.outcome.fetched, 0);
    assert_eq!(cursor(&h).await.as_deref(), Some("2024-03-15T12:00:00Z"));
}

#[tokio::test]
async fn failed_list_keeps_fetched_changes_but_not_the_cursor() {
    let h = Harness::new().await;
    ready(&h, &["10", "20"]).await;
    seed_roster(&h, &[&["1", "2024-01-10 08:00:00", ""]]);
    h.store
        .set(state_keys::LAST_SYNC_TIMESTAMP, "2024-03-10T00:00:00Z")
        .await
        .unwrap();
    mount_since_listing(
        &h,
        "10",
        "2024-03-10T00:00:00Z",
        vec![subscriber(7, "2024-03-12T00:00:00Z", None)],
    )
    .await;
    Mock::given(method("GET"))
        .and(path(subscribers_path("20")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    let err = h.app_state().jobs.sync_subscribers().await.unwrap_err();

    assert!(matches!(err, AppError::AweberApi { status: 404, .. }));
    assert_eq!(cursor(&h).await.as_deref(), Some("2024-03-10T00:00:00Z"));
    assert_eq!(h.store.rows(tables::SUBSCRIBERS.name).len(), 3);
    assert_eq!(h.alerts.subjects(), vec!["aweber-sync: subscriber sync failed"]);
    assert!(h.alerts.bodies()[0].contains("force-full-resync"));
}

#[tokio::test]
async fn force_full_resync_replaces_roster() {
    let h = Harness::new().await;
    ready(&h, &["10"]).await;
    seed_roster(&h, &[&["old", "2023-01-01 00:00:00", ""]]);
    h.store
        .set(state_keys::LAST_SYNC_TIMESTAMP, "2024-03-10T00:00:00Z")
        .await
        .unwrap();
    mount_full_listing(&h, "10", vec![subscriber(5, "2024-03-01T00:00:00Z", None)]).await;

    let result = h.app_state().jobs.force_full_resync().await.unwrap();

    assert_eq!(result.outcome.mode, SubscriberSyncMode::FirstRun);
    assert_eq!(&h.store.rows(tables::SUBSCRIBERS.name)[1..], &[row(&[
        "5",
        "2024-03-01 00:00:00",
        ""
    ])]);
    assert_eq!(cursor(&h).await.as_deref(), Some("2024-03-15T12:00:00Z"));
}

#[tokio::test]
async fn second_trigger_while_running_conflicts() {
    let h = Harness::new().await;
    h.seed_credential().await;
    Mock::given(method("GET"))
        .and(path("/1.0/accounts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(collection(vec![json!({"id": 1001})], None))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&h.server)
        .await;
    h.mount_lists(&["10"]).await;
    mount_full_listing(&h, "10", vec![]).await;
    let state = h.app_state();

    let running = {
        let state = Arc::clone(&state);
        tokio::spawn(async move { state.jobs.sync_subscribers().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = state.jobs.reconcile_subscribers().await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(state.jobs.reset_sync_cursor().await.is_err());

    running.await.unwrap().unwrap();
    state.jobs.reset_sync_cursor().await.unwrap();
    assert_eq!(cursor(&h).await, None);
}

// ═══════════════════════════════════════════════════════════════════════════
// RECONCILIATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reconcile_marks_missing_without_deleting() {
    let h = Harness::new().await;
    ready(&h, &["10"]).await;
    seed_roster(&h, &[
        &["1", "2024-01-10 08:00:00", ""],
        &["2", "2024-01-11 08:00:00", ""],
        &["3", "2024-01-12 08:00:00", "2024-02-01 00:00:00"],
    ]);
    mount_id_listing(&h, "10", collection(vec![json!({"id": 1})], None)).await;

    let outcome = h.app_state().jobs.reconcile_subscribers().await.unwrap();

    assert_eq!(outcome.remote_ids, 1);
    assert_eq!(outcome.local_rows, 3);
    assert_eq!(outcome.missing, 2);
    assert_eq!(outcome.marked, 1);
    assert_eq!(&h.store.rows(tables::SUBSCRIBERS.name)[1..], &[
        row(&["1", "2024-01-10 08:00:00", ""]),
        row(&["2", "2024-01-11 08:00:00", "MANUAL_DELETE_2024-03-15T12:00:00Z"]),
        row(&["3", "2024-01-12 08:00:00", "2024-02-01 00:00:00"]),
    ]);
}

#[tokio::test]
async fn reconcile_marks_nothing_when_provider_returns_no_ids() {
    let h = Harness::new().await;
    ready(&h, &["10"]).await;
    seed_roster(&h, &[&["1", "2024-01-10 08:00:00", ""]]);
    mount_id_listing(&h, "10", collection(vec![], None)).await;

    let outcome = h.app_state().jobs.reconcile_subscribers().await.unwrap();

    assert_eq!(outcome.marked, 0);
    assert_eq!(h.store.rows(tables::SUBSCRIBERS.name)[1][2], "");
}

#[tokio::test]
async fn reconcile_refuses_incomplete_listing() {
    let h = Harness::new().await;
    ready(&h, &["10"]).await;
    seed_roster(&h, &[&["1", "2024-01-10 08:00:00", ""]]);
    mount_id_listing(&h, "10", json!({"total_size": 1})).await;

    let err = h.app_state().jobs.reconcile_subscribers().await.unwrap_err();

    assert!(matches!(err, AppError::Parse(_)));
    assert_eq!(h.store.rows(tables::SUBSCRIBERS.name)[1][2], "");
    assert_eq!(
        h.alerts.subjects(),
        vec!["aweber-sync: subscriber reconciliation failed"]
    );
}
