// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Drains AWeber collections by following `next_collection_link`.

use crate::error::AppError;
use crate::services::aweber::ApiClient;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// Extracts the identifier compared against a sentinel.
pub type IdExtractor = fn(&Value) -> Option<String>;

/// Lazy sequence of collection pages.
///
/// Stop conditions are checked after every page and may be combined. Not
/// restartable: to resume, start a new paginator from [`Paginator::next_link`].
pub struct Paginator<'a> {
    client: &'a ApiClient,
    token: String,
    next_url: Option<String>,
    page_delay: Duration,

    max_items: Option<usize>,
    max_pages: Option<usize>,
    time_budget: Option<chrono::Duration>,
    sentinel: Option<(String, IdExtractor)>,

    pages: usize,
    items: usize,
    started_at: Option<DateTime<Utc>>,
    done: bool,
    malformed: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        client: &'a ApiClient,
        seed_url: impl Into<String>,
        token: &str,
        page_delay: Duration,
    ) -> Self {
        Self {
            client,
            token: token.to_string(),
            next_url: Some(seed_url.into()),
            page_delay,
            max_items: None,
            max_pages: None,
            time_budget: None,
            sentinel: None,
            pages: 0,
            items: 0,
            started_at: None,
            done: false,
            malformed: false,
        }
    }

    /// Stop after yielding `n` entries in total (the last page is truncated).
    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.max_pages = Some(n);
        self
    }

    /// Stop once this much time has passed since the first fetch.
    pub fn time_budget(mut self, budget: chrono::Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Stop at the entry whose id is `id`; it and everything after it are dropped.
    pub fn stop_at_id(mut self, id: impl Into<String>, extract: IdExtractor) -> Self {
        self.sentinel = Some((id.into(), extract));
        self
    }

    /// Continuation link for the page after the last one yielded.
    pub fn next_link(&self) -> Option<&str> {
        self.next_url.as_deref()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Whether iteration ended on a page without an `entries` array.
    pub fn hit_malformed_page(&self) -> bool {
        self.malformed
    }

    fn budget_exhausted(&self) -> bool {
        if self.max_pages.is_some_and(|max| self.pages >= max) {
            return true;
        }
        if self.max_items.is_some_and(|max| self.items >= max) {
            return true;
        }
        match (self.time_budget, self.started_at) {
            (Some(budget), Some(start)) => self.client.clock().now() - start >= budget,
            _ => false,
        }
    }

    /// Fetch the next page. `Ok(None)` once the collection or a budget is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>, AppError> {
        if self.done || self.budget_exhausted() {
            self.done = true;
            return Ok(None);
        }
        let Some(url) = self.next_url.clone() else {
            self.done = true;
            return Ok(None);
        };

        if self.pages > 0 {
            self.client.clock().sleep(self.page_delay).await;
        } else {
            self.started_at = Some(self.client.clock().now());
        }

        let body = match self.client.request(&url, &self.token).await {
            Ok(body) => body,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.pages += 1;

        let Some(mut entries) = body.get("entries").and_then(Value::as_array).cloned() else {
            tracing::warn!(url = %url, "Collection page has no entries array; stopping");
            self.done = true;
            self.malformed = true;
            return Ok(None);
        };

        self.next_url = body
            .get("next_collection_link")
            .and_then(Value::as_str)
            .filter(|link| !link.is_empty())
            .map(str::to_string);
        if self.next_url.is_none() {
            self.done = true;
        }

        if let Some((sentinel, extract)) = &self.sentinel {
            if let Some(pos) = entries
                .iter()
                .position(|entry| extract(entry).as_deref() == Some(sentinel.as_str()))
            {
                tracing::debug!(sentinel = %sentinel, "Reached previously seen entry");
                entries.truncate(pos);
                self.done = true;
            }
        }

        if let Some(max) = self.max_items {
            let remaining = max.saturating_sub(self.items);
            if entries.len() >= remaining {
                entries.truncate(remaining);
                self.done = true;
            }
        }

        self.items += entries.len();
        Ok(Some(entries))
    }

    /// Drain every remaining page into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<Value>, AppError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}
