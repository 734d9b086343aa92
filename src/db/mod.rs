// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage layer: tabular store for the synced tables, key-value store for
//! the credential and sync cursor.
//!
//! Row 0 of every table is its header row; data rows start at index 1.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use async_trait::async_trait;

/// A table row: one string per cell.
pub type Row = Vec<String>;

/// Row-oriented store in the shape of a spreadsheet.
///
/// Indices are 0-based and include the header row.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// All rows, header included, in row order.
    async fn read_all_rows(&self, table: &str) -> Result<Vec<Row>, AppError>;

    /// Up to `num_rows` rows starting at `start_row`.
    async fn read_range(
        &self,
        table: &str,
        start_row: usize,
        num_rows: usize,
    ) -> Result<Vec<Row>, AppError>;

    /// Overwrite a rectangle of cells whose top-left corner is (`start_row`, `start_col`).
    ///
    /// Rows and columns past the current end of the table are created.
    async fn write_range(
        &self,
        table: &str,
        start_row: usize,
        start_col: usize,
        values: &[Row],
    ) -> Result<(), AppError>;

    /// Insert a row before `index`, shifting later rows down.
    async fn insert_row(&self, table: &str, index: usize, row: Row) -> Result<(), AppError>;

    /// Add a row after the last one.
    async fn append_row(&self, table: &str, row: Row) -> Result<(), AppError>;

    /// Remove every row from `start_row` onward.
    async fn clear_contents(&self, table: &str, start_row: usize) -> Result<(), AppError>;

    /// Remove every row, header included.
    async fn clear_all(&self, table: &str) -> Result<(), AppError>;
}

/// Durable key-value store for process-wide state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// Keys in the state store.
pub mod state_keys {
    /// Encrypted OAuth credential blob.
    pub const CREDENTIAL: &str = "oauth2.aweber";
    /// Timestamp of the last successful subscriber load (RFC3339).
    pub const LAST_SYNC_TIMESTAMP: &str = "lastSyncTimestamp";
    /// Newest broadcast id seen by the previous broadcast run.
    pub const LAST_PROCESSED_BROADCAST: &str = "broadcasts.last_processed_id";
}

/// A named table with a fixed header row.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub headers: &'static [&'static str],
}

impl TableSchema {
    pub fn header_row(&self) -> Row {
        self.headers.iter().map(|h| h.to_string()).collect()
    }

    /// Whether `row` starts with exactly this table's headers.
    pub fn matches(&self, row: Option<&Row>) -> bool {
        match row {
            Some(row) => {
                row.len() >= self.headers.len()
                    && self.headers.iter().zip(row).all(|(h, cell)| cell == h)
            }
            None => false,
        }
    }
}

/// Table schemas as constants.
pub mod tables {
    use super::TableSchema;

    pub const BROADCASTS: TableSchema = TableSchema {
        name: "Email Stats(Broadcasts)",
        headers: &[
            "Sent Date",
            "Broadcast ID",
            "Audience",
            "Subject",
            "Total Sent",
            "Delivered Count",
            "Delivered %",
            "Total Unique Opens",
            "Opens %",
            "Clicks",
            "Clicks %",
            "Complaint Count",
            "Complaint %",
            "Undelivered Count",
            "Undeliv %",
        ],
    };

    pub const SUBSCRIBERS: TableSchema = TableSchema {
        name: "AWeber Subscriber Data",
        headers: &["Subscriber ID", "Subscribed At", "Unsubscribed At"],
    };

    pub const MONTHLY_STATS: TableSchema = TableSchema {
        name: "Email Stats Overall",
        headers: &[
            "Year",
            "Month",
            "Total Email Subscribers",
            "% vs previous month",
            "New Subscribers",
            "% vs previous month",
            "Unsubscribes",
            "Unsubscribe Rate (%)",
        ],
    };
}

/// Make sure `schema`'s header row is in place, resetting the table if not.
///
/// Returns `true` when the table was (re)initialized.
pub async fn ensure_table(store: &dyn TabularStore, schema: TableSchema) -> Result<bool, AppError> {
    let first = store.read_range(schema.name, 0, 1).await?;
    if schema.matches(first.first()) {
        return Ok(false);
    }

    store.clear_all(schema.name).await?;
    store.append_row(schema.name, schema.header_row()).await?;
    tracing::info!(table = schema.name, "Initialized table with headers");
    Ok(true)
}

/// Number of rows below the header.
pub async fn data_row_count(store: &dyn TabularStore, table: &str) -> Result<usize, AppError> {
    Ok(store.read_all_rows(table).await?.len().saturating_sub(1))
}
