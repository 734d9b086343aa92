// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running.
//! Run with FIRESTORE_EMULATOR_HOST pointing at it; otherwise they are skipped.
//!
//! Most tests work on their own uniquely named table or key.

use aweber_sync::db::{
    ensure_table, tables, FirestoreDb, Row, StateStore, TableSchema, TabularStore,
};
use aweber_sync::services::aggregation::rebuild_monthly_aggregates;

mod common;
use common::{start_time, test_db};

/// Unique suffix for test isolation.
fn unique(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}-{nanos}")
}

fn row(cells: &[&str]) -> Row {
    cells.iter().map(|c| c.to_string()).collect()
}

async fn seeded(db: &FirestoreDb, table: &str, rows: &[Row]) {
    for r in rows {
        db.append_row(table, r.clone()).await.unwrap();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TABLE TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_append_and_read_back_in_order() {
    require_emulator!();

    let db = test_db().await;
    let table = unique("append");
    seeded(&db, &table, &[row(&["h1", "h2"]), row(&["a", "1"]), row(&["b", "2"])]).await;

    let rows = db.read_all_rows(&table).await.unwrap();
    assert_eq!(rows, vec![row(&["h1", "h2"]), row(&["a", "1"]), row(&["b", "2"])]);

    let middle = db.read_range(&table, 1, 1).await.unwrap();
    assert_eq!(middle, vec![row(&["a", "1"])]);
}

#[tokio::test]
async fn test_insert_shifts_later_rows() {
    require_emulator!();

    let db = test_db().await;
    let table = unique("insert");
    seeded(&db, &table, &[row(&["h"]), row(&["a"]), row(&["c"])]).await;

    db.insert_row(&table, 2, row(&["b"])).await.unwrap();

    let rows = db.read_all_rows(&table).await.unwrap();
    assert_eq!(rows, vec![row(&["h"]), row(&["a"]), row(&["b"]), row(&["c"])]);
}

#[tokio::test]
async fn test_insert_shift_across_several_transactions() {
    require_emulator!();

    let db = test_db().await;
    let table = unique("long-insert");
    let rows: Vec<Row> = (0..450).map(|i| row(&[&i.to_string()])).collect();
    db.write_range(&table, 0, 0, &rows).await.unwrap();

    db.insert_row(&table, 1, row(&["new"])).await.unwrap();

    let after = db.read_all_rows(&table).await.unwrap();
    assert_eq!(after.len(), 451);
    assert_eq!(after[0], row(&["0"]));
    assert_eq!(after[1], row(&["new"]));
    assert_eq!(after[2], row(&["1"]));
    assert_eq!(after[450], row(&["449"]));
}

#[tokio::test]
async fn test_write_range_extends_and_overwrites_cells() {
    require_emulator!();

    let db = test_db().await;
    let table = unique("range");
    seeded(&db, &table, &[row(&["h1", "h2", "h3"]), row(&["1", "x", ""])]).await;

    db.write_range(&table, 1, 2, &[row(&["gone"])]).await.unwrap();
    db.write_range(&table, 2, 0, &[row(&["2", "y"])]).await.unwrap();

    let rows = db.read_all_rows(&table).await.unwrap();
    assert_eq!(rows[1], row(&["1", "x", "gone"]));
    assert_eq!(rows[2], row(&["2", "y"]));
}

#[tokio::test]
async fn test_clear_contents_keeps_header() {
    require_emulator!();

    let db = test_db().await;
    let table = unique("clear");
    seeded(&db, &table, &[row(&["h"]), row(&["a"]), row(&["b"])]).await;

    db.clear_contents(&table, 1).await.unwrap();
    assert_eq!(db.read_all_rows(&table).await.unwrap(), vec![row(&["h"])]);

    db.clear_all(&table).await.unwrap();
    assert!(db.read_all_rows(&table).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ensure_table_writes_header_once() {
    require_emulator!();

    let db = test_db().await;
    let name: &'static str = Box::leak(unique("schema").into_boxed_str());
    let schema = TableSchema {
        name,
        headers: &["Subscriber ID", "Subscribed At", "Unsubscribed At"],
    };

    assert!(ensure_table(&db, schema).await.unwrap());
    assert!(!ensure_table(&db, schema).await.unwrap());
    assert_eq!(db.read_all_rows(name).await.unwrap(), vec![schema.header_row()]);
}

#[tokio::test]
async fn test_monthly_rebuild_against_firestore() {
    require_emulator!();

    let db = test_db().await;
    // Shared table names: start from a known state.
    db.clear_all(tables::SUBSCRIBERS.name).await.unwrap();
    db.clear_all(tables::MONTHLY_STATS.name).await.unwrap();
    seeded(&db, tables::SUBSCRIBERS.name, &[
        tables::SUBSCRIBERS.header_row(),
        row(&["1", "2024-02-10 08:00:00", ""]),
        row(&["2", "2024-03-01 08:00:00", "2024-03-09 00:00:00"]),
    ])
    .await;

    let months = rebuild_monthly_aggregates(&db, start_time()).await.unwrap();

    assert_eq!(months.len(), 2);
    let rows = db.read_all_rows(tables::MONTHLY_STATS.name).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[2][..3], &["2024", "March", "2"]);
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_state_round_trip_and_delete() {
    require_emulator!();

    let db = test_db().await;
    let key = unique("cursor");

    assert_eq!(db.get(&key).await.unwrap(), None);
    db.set(&key, "2024-03-15T12:00:00Z").await.unwrap();
    assert_eq!(
        db.get(&key).await.unwrap().as_deref(),
        Some("2024-03-15T12:00:00Z")
    );

    db.delete(&key).await.unwrap();
    assert_eq!(db.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_offline_client_reports_database_error() {
    let db = FirestoreDb::new_mock();

    let err = db.read_all_rows("anything").await.unwrap_err();
    assert!(matches!(err, aweber_sync::error::AppError::Database(_)));
    assert!(db.get("anything").await.is_err());
}
