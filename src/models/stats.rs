// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Trailing monthly subscriber rollups.
//!
//! Recomputed from the full subscriber snapshot every time, since late
//! arriving history can change any month in the window.

use crate::db::Row;
use crate::models::subscriber::parse_unsubscribed_at;
use crate::time_utils;
use chrono::{DateTime, Datelike, Utc};

/// Longest window reported.
pub const MAX_MONTHS: i32 = 12;

/// One row of the monthly stats table.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyAggregate {
    pub year: i32,
    /// 1-based calendar month
    pub month: u32,
    pub total_subscribers: u64,
    pub pct_vs_prev_month: f64,
    pub new_subscribers: u64,
    pub new_pct_vs_prev_month: f64,
    pub unsubscribes: u64,
    pub unsubscribe_rate: f64,
}

impl MonthlyAggregate {
    pub fn month_name(&self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| chrono::Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("")
    }

    /// Cells in table column order.
    pub fn to_row(&self) -> Row {
        vec![
            self.year.to_string(),
            self.month_name().to_string(),
            self.total_subscribers.to_string(),
            format!("{:.2}", self.pct_vs_prev_month),
            self.new_subscribers.to_string(),
            format!("{:.2}", self.new_pct_vs_prev_month),
            self.unsubscribes.to_string(),
            format!("{:.2}", self.unsubscribe_rate),
        ]
    }
}

/// Percent change from `prev` to `curr`: 100 when growing from zero.
pub fn percent_change(prev: u64, curr: u64) -> f64 {
    if prev > 0 {
        (curr as f64 - prev as f64) / prev as f64 * 100.0
    } else if curr > 0 {
        100.0
    } else {
        0.0
    }
}

struct Event {
    subscribed: DateTime<Utc>,
    unsubscribed: Option<DateTime<Utc>>,
}

/// Monthly rollups, oldest first, for the months from the earliest
/// subscription through `now`'s month (at most [`MAX_MONTHS`], at least one).
///
/// `rows` are subscriber data rows (no header). Rows without an id or a
/// parsable `Subscribed At` are ignored.
pub fn compute_trailing_months(rows: &[Row], now: DateTime<Utc>) -> Vec<MonthlyAggregate> {
    let events: Vec<Event> = rows
        .iter()
        .filter(|row| row.first().is_some_and(|id| !id.trim().is_empty()))
        .filter_map(|row| {
            let subscribed = time_utils::parse_cell_timestamp(row.get(1)?)?;
            let unsubscribed = row.get(2).and_then(|cell| parse_unsubscribed_at(cell));
            Some(Event {
                subscribed,
                unsubscribed,
            })
        })
        .collect();

    let earliest = events.iter().map(|e| e.subscribed).min().unwrap_or(now);
    let months = (time_utils::months_between(earliest, now) + 1).clamp(1, MAX_MONTHS);

    let mut aggregates = Vec::with_capacity(months as usize);
    for offset in (0..months).rev() {
        let (year, month) = time_utils::shift_month(now.year(), now.month(), -offset);
        let (next_year, next_month) = time_utils::shift_month(year, month, 1);
        let (Some(start), Some(end)) = (
            time_utils::month_start(year, month),
            time_utils::month_start(next_year, next_month),
        ) else {
            continue;
        };
        let in_month = |ts: DateTime<Utc>| ts >= start && ts < end;

        let total_subscribers = events.iter().filter(|e| e.subscribed < end).count() as u64;
        let new_subscribers = events.iter().filter(|e| in_month(e.subscribed)).count() as u64;
        let unsubscribes = events
            .iter()
            .filter(|e| e.unsubscribed.is_some_and(in_month))
            .count() as u64;

        aggregates.push(MonthlyAggregate {
            year,
            month,
            total_subscribers,
            pct_vs_prev_month: 0.0,
            new_subscribers,
            new_pct_vs_prev_month: 0.0,
            unsubscribes,
            unsubscribe_rate: 0.0,
        });
    }

    // Derived columns need every month in place first.
    for i in 0..aggregates.len() {
        if i > 0 {
            let (prev_total, prev_new) = (
                aggregates[i - 1].total_subscribers,
                aggregates[i - 1].new_subscribers,
            );
            let curr = &mut aggregates[i];
            curr.pct_vs_prev_month = percent_change(prev_total, curr.total_subscribers);
            curr.new_pct_vs_prev_month = percent_change(prev_new, curr.new_subscribers);
        }
        let curr = &mut aggregates[i];
        curr.unsubscribe_rate = if curr.total_subscribers > 0 {
            curr.unsubscribes as f64 / curr.total_subscribers as f64 * 100.0
        } else {
            0.0
        };
    }

    aggregates
}
