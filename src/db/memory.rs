// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory storage for tests and offline runs.

use crate::db::{Row, StateStore, TabularStore};
use crate::error::AppError;
use async_trait::async_trait;
use dashmap::DashMap;

/// Tables and state held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, Vec<Row>>,
    state: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a table's contents wholesale.
    pub fn seed_table(&self, table: &str, rows: Vec<Row>) {
        self.tables.insert(table.to_string(), rows);
    }

    /// Set a state value without going through the async trait.
    pub fn put_state(&self, key: &str, value: &str) {
        self.state.insert(key.to_string(), value.to_string());
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

/// Overwrite `cells` from `start_col` with `new_cells`, padding with empty cells.
pub(crate) fn splice_cells(cells: &mut Row, start_col: usize, new_cells: &[String]) {
    let needed = start_col + new_cells.len();
    if cells.len() < needed {
        cells.resize(needed, String::new());
    }
    cells[start_col..needed].clone_from_slice(new_cells);
}

#[async_trait]
impl TabularStore for MemoryStore {
    async fn read_all_rows(&self, table: &str) -> Result<Vec<Row>, AppError> {
        Ok(self.rows(table))
    }

    async fn read_range(
        &self,
        table: &str,
        start_row: usize,
        num_rows: usize,
    ) -> Result<Vec<Row>, AppError> {
        Ok(self
            .tables
            .get(table)
            .map(|rows| rows.iter().skip(start_row).take(num_rows).cloned().collect())
            .unwrap_or_default())
    }

    async fn write_range(
        &self,
        table: &str,
        start_row: usize,
        start_col: usize,
        values: &[Row],
    ) -> Result<(), AppError> {
        let mut rows = self.tables.entry(table.to_string()).or_default();
        let needed = start_row + values.len();
        if rows.len() < needed {
            rows.resize(needed, Vec::new());
        }
        for (offset, new_cells) in values.iter().enumerate() {
            splice_cells(&mut rows[start_row + offset], start_col, new_cells);
        }
        Ok(())
    }

    async fn insert_row(&self, table: &str, index: usize, row: Row) -> Result<(), AppError> {
        let mut rows = self.tables.entry(table.to_string()).or_default();
        if index >= rows.len() {
            rows.resize(index, Vec::new());
            rows.push(row);
        } else {
            rows.insert(index, row);
        }
        Ok(())
    }

    async fn append_row(&self, table: &str, row: Row) -> Result<(), AppError> {
        self.tables.entry(table.to_string()).or_default().push(row);
        Ok(())
    }

    async fn clear_contents(&self, table: &str, start_row: usize) -> Result<(), AppError> {
        if let Some(mut rows) = self.tables.get_mut(table) {
            rows.truncate(start_row);
        }
        Ok(())
    }

    async fn clear_all(&self, table: &str) -> Result<(), AppError> {
        self.tables.remove(table);
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.state.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.state.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.state.remove(key);
        Ok(())
    }
}
