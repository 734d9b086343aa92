// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscriber roster rows.

use crate::db::Row;
use crate::time_utils;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Prefix of the value written to `Unsubscribed At` when a subscriber
/// vanished from the provider without an unsubscribe event.
pub const MANUAL_DELETE_PREFIX: &str = "MANUAL_DELETE_";

/// Subscriber entry from the provider's collection.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSubscriber {
    pub id: serde_json::Value,
    #[serde(default)]
    pub subscribed_at: Option<String>,
    #[serde(default)]
    pub unsubscribed_at: Option<String>,
}

/// One row of the subscriber table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRecord {
    pub subscriber_id: String,
    /// Cell text: `YYYY-MM-DD HH:MM:SS`
    pub subscribed_at: String,
    /// Cell text: empty, a timestamp, or a manual-delete sentinel
    pub unsubscribed_at: String,
}

impl SubscriberRecord {
    /// Convert a provider entry; `None` when it has no usable id.
    pub fn from_api(sub: &ApiSubscriber) -> Option<Self> {
        let subscriber_id = match &sub.id {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };

        Some(Self {
            subscriber_id,
            subscribed_at: format_api_date(sub.subscribed_at.as_deref()),
            unsubscribed_at: format_api_date(sub.unsubscribed_at.as_deref()),
        })
    }

    pub fn from_row(row: &[String]) -> Option<Self> {
        let id = row.first()?.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            subscriber_id: id.to_string(),
            subscribed_at: row.get(1).cloned().unwrap_or_default(),
            unsubscribed_at: row.get(2).cloned().unwrap_or_default(),
        })
    }

    pub fn to_row(&self) -> Row {
        vec![
            self.subscriber_id.clone(),
            self.subscribed_at.clone(),
            self.unsubscribed_at.clone(),
        ]
    }
}

/// Normalize a provider timestamp to cell text; empty when absent or unparsable.
fn format_api_date(raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match time_utils::parse_api_timestamp(raw) {
            Some(ts) => time_utils::format_cell_timestamp(ts),
            None => {
                tracing::warn!(value = raw, "Unparsable subscriber timestamp");
                String::new()
            }
        },
        None => String::new(),
    }
}

/// Sentinel for a subscriber missing from the provider, observed at `now`.
pub fn manual_delete_marker(now: DateTime<Utc>) -> String {
    format!(
        "{}{}",
        MANUAL_DELETE_PREFIX,
        time_utils::format_utc_rfc3339(now)
    )
}

/// Timestamp of an `Unsubscribed At` cell, including manual-delete sentinels.
pub fn parse_unsubscribed_at(cell: &str) -> Option<DateTime<Utc>> {
    let cell = cell.trim();
    match cell.strip_prefix(MANUAL_DELETE_PREFIX) {
        Some(rest) => time_utils::parse_cell_timestamp(rest),
        None => time_utils::parse_cell_timestamp(cell),
    }
}
