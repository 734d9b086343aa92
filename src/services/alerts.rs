// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Out-of-band operator alerts.
//!
//! Delivery is best effort: failures are logged and never reach the caller.

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Longest alert body sent, in characters.
pub const MAX_BODY_CHARS: usize = 1000;

/// Destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::error!(alert = true, subject, body, "Operator alert");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookAlert<'a> {
    subject: &'a str,
    body: &'a str,
    source: &'static str,
}

/// POSTs alerts as JSON to a relay (e.g. a mail gateway).
pub struct WebhookAlertSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookAlert {
                subject,
                body,
                source: "aweber-sync",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("alert webhook returned HTTP {}", response.status());
        }
        Ok(())
    }
}

/// Debounced, truncating front end for an [`AlertSink`].
#[derive(Clone)]
pub struct Alerter {
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    window: chrono::Duration,
    /// Last delivery time per subject
    last_sent: Arc<DashMap<String, DateTime<Utc>>>,
}

impl Alerter {
    pub fn new(sink: Arc<dyn AlertSink>, clock: Arc<dyn Clock>, window: chrono::Duration) -> Self {
        Self {
            sink,
            clock,
            window,
            last_sent: Arc::new(DashMap::new()),
        }
    }

    /// Send an alert unless one with the same subject went out within the window.
    ///
    /// Returns whether the alert was handed to the sink.
    pub async fn alert(&self, subject: &str, body: &str) -> bool {
        let now = self.clock.now();
        if let Some(last) = self.last_sent.get(subject) {
            if now - *last < self.window {
                tracing::debug!(subject, "Alert suppressed (debounced)");
                return false;
            }
        }
        self.last_sent.insert(subject.to_string(), now);

        let body = truncate_chars(body, MAX_BODY_CHARS);
        if let Err(e) = self.sink.send(subject, &body).await {
            tracing::warn!(subject, error = %e, "Failed to deliver alert");
        }
        true
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
