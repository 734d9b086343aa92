// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rewrites the monthly overview table from the subscriber roster.

use crate::db::{ensure_table, tables, Row, TabularStore};
use crate::error::AppError;
use crate::models::stats::{compute_trailing_months, MonthlyAggregate};
use chrono::{DateTime, Utc};

/// Recompute every month and replace the overview rows.
///
/// Any month can change when older subscribers arrive, so the table is
/// cleared below the header and written in full each time.
pub async fn rebuild_monthly_aggregates(
    store: &dyn TabularStore,
    now: DateTime<Utc>,
) -> Result<Vec<MonthlyAggregate>, AppError> {
    let roster = store.read_all_rows(tables::SUBSCRIBERS.name).await?;
    let data = roster.get(1..).unwrap_or_default();
    let aggregates = compute_trailing_months(data, now);

    ensure_table(store, tables::MONTHLY_STATS).await?;
    store.clear_contents(tables::MONTHLY_STATS.name, 1).await?;

    let rows: Vec<Row> = aggregates.iter().map(MonthlyAggregate::to_row).collect();
    if !rows.is_empty() {
        store
            .write_range(tables::MONTHLY_STATS.name, 1, 0, &rows)
            .await?;
    }

    tracing::info!(
        subscribers = data.len(),
        months = aggregates.len(),
        "Rebuilt monthly aggregates"
    );
    Ok(aggregates)
}
