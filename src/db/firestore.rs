// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed storage.
//!
//! - State keys are documents in the `sync_state` collection.
//! - Each table is a collection of row documents. The document id is the
//!   zero-padded row position, so rows sort and address naturally.

use crate::db::{Row, StateStore, TabularStore};
use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Collection names as constants.
pub mod collections {
    pub const SYNC_STATE: &str = "sync_state";
    /// Prefix for per-table row collections.
    pub const TABLE_PREFIX: &str = "table_";
}

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// One table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RowDocument {
    position: i64,
    cells: Vec<String>,
}

/// One state value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateDocument {
    value: String,
    updated_at: String,
}

fn table_collection(table: &str) -> String {
    format!("{}{}", collections::TABLE_PREFIX, urlencoding::encode(table))
}

fn row_document_id(position: usize) -> String {
    format!("r{:010}", position)
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Row Helpers ─────────────────────────────────────────────

    /// Row documents with `position >= start`, in order, at most `limit` of them.
    async fn query_rows(
        &self,
        table: &str,
        start: usize,
        limit: Option<usize>,
    ) -> Result<Vec<RowDocument>, AppError> {
        let collection = table_collection(table);
        let start = start as i64;

        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collection.as_str())
            .filter(move |q| q.for_all([q.field("position").greater_than_or_equal(start)]))
            .order_by([("position", firestore::FirestoreQueryDirection::Ascending)]);

        let query = match limit {
            Some(limit) => query.limit(limit as u32),
            None => query,
        };

        query
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Position one past the last row.
    async fn row_count(&self, table: &str) -> Result<usize, AppError> {
        let collection = table_collection(table);
        let last: Vec<RowDocument> = self
            .get_client()?
            .fluent()
            .select()
            .from(collection.as_str())
            .order_by([("position", firestore::FirestoreQueryDirection::Descending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(last.first().map(|doc| doc.position as usize + 1).unwrap_or(0))
    }

    /// Write row documents using transactions of at most `BATCH_SIZE` writes.
    ///
    /// Chunks commit in order; a failure leaves the earlier chunks written.
    async fn write_rows(&self, table: &str, rows: Vec<RowDocument>) -> Result<(), AppError> {
        let client = self.get_client()?;
        let collection = table_collection(table);
        let mut committed = 0;

        for chunk in rows.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for doc in chunk {
                client
                    .fluent()
                    .update()
                    .in_col(collection.as_str())
                    .document_id(row_document_id(doc.position as usize))
                    .object(doc)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!("Failed to add row to transaction: {}", e))
                    })?;
            }

            if let Err(e) = transaction.commit().await {
                if committed > 0 {
                    tracing::error!(
                        table,
                        committed,
                        remaining = rows.len() - committed,
                        "Row write interrupted after a partial commit"
                    );
                }
                return Err(AppError::Database(format!("Transaction commit failed: {}", e)));
            }
            committed += chunk.len();
        }

        Ok(())
    }

    /// Helper to batch delete row documents using transactions.
    async fn batch_delete(&self, table: &str, positions: &[usize]) -> Result<(), AppError> {
        let client = self.get_client()?;
        let collection = table_collection(table);

        for chunk in positions.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for position in chunk {
                client
                    .fluent()
                    .delete()
                    .from(collection.as_str())
                    .document_id(row_document_id(*position))
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }
}

// ─── Tabular Store ───────────────────────────────────────────────

#[async_trait]
impl TabularStore for FirestoreDb {
    async fn read_all_rows(&self, table: &str) -> Result<Vec<Row>, AppError> {
        let docs = self.query_rows(table, 0, None).await?;
        Ok(docs.into_iter().map(|doc| doc.cells).collect())
    }

    async fn read_range(
        &self,
        table: &str,
        start_row: usize,
        num_rows: usize,
    ) -> Result<Vec<Row>, AppError> {
        if num_rows == 0 {
            return Ok(Vec::new());
        }
        let docs = self.query_rows(table, start_row, Some(num_rows)).await?;
        Ok(docs.into_iter().map(|doc| doc.cells).collect())
    }

    async fn write_range(
        &self,
        table: &str,
        start_row: usize,
        start_col: usize,
        values: &[Row],
    ) -> Result<(), AppError> {
        if values.is_empty() {
            return Ok(());
        }

        let existing = self.read_range(table, start_row, values.len()).await?;
        let count = self.row_count(table).await?;

        let mut docs = Vec::with_capacity(values.len());
        for (offset, new_cells) in values.iter().enumerate() {
            let mut cells = existing.get(offset).cloned().unwrap_or_default();
            super::memory::splice_cells(&mut cells, start_col, new_cells);
            docs.push(RowDocument {
                position: (start_row + offset) as i64,
                cells,
            });
        }

        // Writing past the end leaves no holes: pad with empty rows.
        let mut padding: Vec<RowDocument> = (count..start_row)
            .map(|position| RowDocument {
                position: position as i64,
                cells: Vec::new(),
            })
            .collect();
        padding.extend(docs);

        self.write_rows(table, padding).await
    }

    async fn insert_row(&self, table: &str, index: usize, row: Row) -> Result<(), AppError> {
        let count = self.row_count(table).await?;
        if index >= count {
            return self.write_range(table, index, 0, &[row]).await;
        }

        // Shift from the end: an interrupted shift repeats one row, never drops one.
        let tail = self.query_rows(table, index, None).await?;
        let mut docs: Vec<RowDocument> = tail
            .into_iter()
            .rev()
            .map(|doc| RowDocument {
                position: doc.position + 1,
                cells: doc.cells,
            })
            .collect();
        docs.push(RowDocument {
            position: index as i64,
            cells: row,
        });

        let shifted = docs.len() - 1;
        tracing::debug!(table, index, shifted, "Inserting row");
        self.write_rows(table, docs).await.inspect_err(|e| {
            if shifted >= BATCH_SIZE {
                tracing::error!(
                    table,
                    index,
                    shifted,
                    error = %e,
                    "Row shift interrupted; one row between the insert point and the end may appear twice"
                );
            }
        })
    }

    async fn append_row(&self, table: &str, row: Row) -> Result<(), AppError> {
        let count = self.row_count(table).await?;
        self.write_rows(
            table,
            vec![RowDocument {
                position: count as i64,
                cells: row,
            }],
        )
        .await
    }

    async fn clear_contents(&self, table: &str, start_row: usize) -> Result<(), AppError> {
        let positions: Vec<usize> = self
            .query_rows(table, start_row, None)
            .await?
            .into_iter()
            .map(|doc| doc.position as usize)
            .collect();

        let count = positions.len();
        self.batch_delete(table, &positions).await?;
        tracing::debug!(table, start_row, count, "Cleared rows");
        Ok(())
    }

    async fn clear_all(&self, table: &str) -> Result<(), AppError> {
        self.clear_contents(table, 0).await
    }
}

// ─── State Store ─────────────────────────────────────────────────

#[async_trait]
impl StateStore for FirestoreDb {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let doc: Option<StateDocument> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SYNC_STATE)
            .obj()
            .one(&*urlencoding::encode(key))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(doc.map(|d| d.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let doc = StateDocument {
            value: value.to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::SYNC_STATE)
            .document_id(urlencoding::encode(key).into_owned())
            .object(&doc)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::SYNC_STATE)
            .document_id(urlencoding::encode(key).into_owned())
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
