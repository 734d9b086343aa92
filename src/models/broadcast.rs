// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Broadcast (sent campaign) records and their derived metrics.

use crate::db::Row;
use crate::time_utils;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

static SELF_LINK_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"broadcasts/(\d+)").ok());

/// Column holding the broadcast id.
pub const ID_COLUMN: usize = 1;
/// Column holding the sent date.
pub const DATE_COLUMN: usize = 0;

/// Send and engagement counters from a broadcast detail payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastStats {
    #[serde(default)]
    pub num_emailed: Option<u64>,
    #[serde(default)]
    pub num_undeliv: Option<u64>,
    #[serde(default)]
    pub unique_opens: Option<u64>,
    #[serde(default)]
    pub unique_clicks: Option<u64>,
    #[serde(default)]
    pub num_complaints: Option<u64>,
}

/// Broadcast detail payload (only the fields we use).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastDetail {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub sent_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub stats: Option<BroadcastStats>,
}

/// Identifier of a broadcast collection entry.
///
/// Tries, in order: the `id` field, the numeric segment after `broadcasts/`
/// in `self_link`, and the legacy `broadcast_id` field.
pub fn extract_broadcast_id(entry: &Value) -> Option<String> {
    if let Some(id) = entry.get("id").and_then(scalar_to_string) {
        return Some(id);
    }

    if let Some(link) = entry.get("self_link").and_then(Value::as_str) {
        let from_link = SELF_LINK_ID
            .as_ref()
            .and_then(|re| re.captures(link))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        if from_link.is_some() {
            return from_link;
        }
    }

    entry.get("broadcast_id").and_then(scalar_to_string)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One row of the broadcast table.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastRecord {
    pub sent_date: DateTime<Utc>,
    pub broadcast_id: String,
    pub audience: String,
    pub subject: String,
    pub total_sent: u64,
    pub delivered_count: u64,
    pub delivered_pct: f64,
    pub total_unique_opens: u64,
    pub opens_pct: f64,
    pub clicks: u64,
    pub clicks_pct: f64,
    pub complaint_count: u64,
    pub complaint_pct: f64,
    pub undelivered_count: u64,
    pub undelivered_pct: f64,
}

/// `metric / sent * 100`, or 0 when nothing was sent.
pub fn percentage(metric: u64, sent: u64) -> f64 {
    if sent == 0 {
        0.0
    } else {
        metric as f64 / sent as f64 * 100.0
    }
}

impl BroadcastRecord {
    /// Derive a record from a collection entry's id and its detail payload.
    ///
    /// Returns `None` when the detail carries no stats or no usable date.
    pub fn from_detail(
        broadcast_id: String,
        entry: &Value,
        detail: &BroadcastDetail,
        audience: &str,
    ) -> Option<Self> {
        let stats = detail.stats.as_ref()?;

        let field = |name: &str| -> Option<String> {
            entry
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let sent_date = detail
            .sent_at
            .clone()
            .or_else(|| field("sent_at"))
            .or_else(|| detail.created_at.clone())
            .or_else(|| field("created_at"))
            .and_then(|raw| time_utils::parse_api_timestamp(&raw))?;

        let subject = detail
            .subject
            .clone()
            .or_else(|| field("subject"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No Subject".to_string());

        let sent = stats.num_emailed.unwrap_or(0);
        let undelivered = stats.num_undeliv.unwrap_or(0);
        let delivered = sent.saturating_sub(undelivered);
        let opens = stats.unique_opens.unwrap_or(0);
        let clicks = stats.unique_clicks.unwrap_or(0);
        let complaints = stats.num_complaints.unwrap_or(0);

        Some(Self {
            sent_date,
            broadcast_id,
            audience: audience.to_string(),
            subject,
            total_sent: sent,
            delivered_count: delivered,
            delivered_pct: percentage(delivered, sent),
            total_unique_opens: opens,
            opens_pct: percentage(opens, sent),
            clicks,
            clicks_pct: percentage(clicks, sent),
            complaint_count: complaints,
            complaint_pct: percentage(complaints, sent),
            undelivered_count: undelivered,
            undelivered_pct: percentage(undelivered, sent),
        })
    }

    /// Cells in table column order.
    pub fn to_row(&self) -> Row {
        vec![
            time_utils::format_cell_timestamp(self.sent_date),
            self.broadcast_id.clone(),
            self.audience.clone(),
            self.subject.clone(),
            self.total_sent.to_string(),
            self.delivered_count.to_string(),
            format!("{:.2}", self.delivered_pct),
            self.total_unique_opens.to_string(),
            format!("{:.1}", self.opens_pct),
            self.clicks.to_string(),
            format!("{:.2}", self.clicks_pct),
            self.complaint_count.to_string(),
            format!("{:.2}", self.complaint_pct),
            self.undelivered_count.to_string(),
            format!("{:.2}", self.undelivered_pct),
        ]
    }
}
