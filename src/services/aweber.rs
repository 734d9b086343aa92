// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! AWeber REST API client.
//!
//! Handles:
//! - Token refresh and retry on 401
//! - Throttling (429, or 403 mentioning a rate limit) with Retry-After
//! - Backoff on 5xx and transport failures
//!
//! Each of the three budgets is bounded independently.

use crate::clock::Clock;
use crate::config::SyncSettings;
use crate::error::AppError;
use crate::models::BroadcastDetail;
use crate::services::paginator::Paginator;
use crate::services::retry::backoff_delay;
use crate::services::tokens::TokenManager;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// AWeber API client.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenManager,
    clock: Arc<dyn Clock>,
    settings: Arc<SyncSettings>,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        tokens: TokenManager,
        clock: Arc<dyn Clock>,
        settings: Arc<SyncSettings>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            clock,
            settings,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// GET `url` and decode the JSON body.
    ///
    /// Uses `token`, or its successor if it was refreshed since the caller
    /// obtained it.
    pub async fn request(&self, url: &str, token: &str) -> Result<Value, AppError> {
        let s = &self.settings;
        let mut token = self.tokens.latest_access_token(token);
        let mut auth_retries = 0u32;
        let mut throttled = 0u32;
        let mut transient_failures = 0u32;

        loop {
            let response = match self
                .http
                .get(url)
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    transient_failures += 1;
                    if transient_failures >= s.transient_retry_attempts {
                        return Err(AppError::Transport(format!("{url}: {e}")));
                    }
                    let delay =
                        backoff_delay(s.transient_retry_base_delay, transient_failures - 1);
                    tracing::warn!(url, error = %e, delay_ms = delay.as_millis() as u64, "AWeber request failed, retrying");
                    self.clock.sleep(delay).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);

            if status == 200 {
                let body = response
                    .text()
                    .await
                    .map_err(|e| AppError::Transport(format!("{url}: {e}")))?;
                return serde_json::from_str(&body)
                    .map_err(|e| AppError::Parse(format!("{url}: {e}")));
            }

            let body = response.text().await.unwrap_or_default();

            if status == 401 {
                if auth_retries >= s.max_auth_retries {
                    tracing::error!(url, attempts = auth_retries, "Still unauthorized after token refreshes");
                    return Err(AppError::AweberApi { status, body });
                }
                auth_retries += 1;
                tracing::info!(url, attempt = auth_retries, "AWeber returned 401, refreshing token");
                token = self.tokens.refresh(Some(&token)).await?;
                self.clock.sleep(s.auth_retry_delay).await;
                continue;
            }

            if is_throttled(status, &body) {
                throttled += 1;
                if throttled >= s.rate_limit_max_attempts {
                    tracing::error!(url, attempts = throttled, "AWeber rate limit persisted");
                    return Err(AppError::RateLimited { attempts: throttled });
                }
                let wait = retry_after
                    .unwrap_or(s.rate_limit_default_wait)
                    .min(s.rate_limit_max_wait);
                tracing::warn!(url, status, wait_secs = wait.as_secs_f64(), "AWeber rate limited, waiting");
                self.clock.sleep(wait).await;
                continue;
            }

            if (500..600).contains(&status) {
                transient_failures += 1;
                if transient_failures >= s.transient_retry_attempts {
                    return Err(AppError::AweberApi { status, body });
                }
                let delay = backoff_delay(s.transient_retry_base_delay, transient_failures - 1);
                tracing::warn!(url, status, delay_ms = delay.as_millis() as u64, "AWeber server error, retrying");
                self.clock.sleep(delay).await;
                continue;
            }

            tracing::warn!(url, status, body = %body, "AWeber request failed");
            return Err(AppError::AweberApi { status, body });
        }
    }

    // ─── Endpoints ───────────────────────────────────────────────

    /// Id of the first account the token can see.
    pub async fn account_id(&self, token: &str) -> Result<String, AppError> {
        let url = format!("{}/accounts", self.base_url);
        let body = self.request(&url, token).await?;
        body.get("entries")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|account| account.get("id"))
            .and_then(id_to_string)
            .ok_or_else(|| AppError::Parse("accounts response has no account id".to_string()))
    }

    /// Ids of every list in the account.
    pub async fn list_ids(&self, account_id: &str, token: &str) -> Result<Vec<String>, AppError> {
        let url = format!("{}/accounts/{}/lists", self.base_url, account_id);
        let entries = Paginator::new(self, url, token, self.settings.broadcast_page_delay)
            .collect_all()
            .await?;

        Ok(entries
            .iter()
            .filter_map(|list| list.get("id").and_then(id_to_string))
            .collect())
    }

    /// Sent broadcasts of a list.
    pub fn broadcasts_url(&self, account_id: &str, list_id: &str) -> Result<String, AppError> {
        self.url_with_params(
            &format!("accounts/{account_id}/lists/{list_id}/broadcasts"),
            &[("status", "sent".to_string())],
        )
    }

    /// Detail (with stats) of one broadcast.
    pub async fn broadcast_detail(
        &self,
        account_id: &str,
        list_id: &str,
        broadcast_id: &str,
        token: &str,
    ) -> Result<BroadcastDetail, AppError> {
        let url = format!(
            "{}/accounts/{}/lists/{}/broadcasts/{}",
            self.base_url, account_id, list_id, broadcast_id
        );
        let body = self.request(&url, token).await?;
        serde_json::from_value(body).map_err(|e| AppError::Parse(format!("{url}: {e}")))
    }

    /// Subscriber search within a list.
    ///
    /// `since` filters on subscription time; `id_only` narrows entries to `id`.
    pub fn subscribers_url(
        &self,
        account_id: &str,
        list_id: &str,
        page_size: u32,
        since: Option<DateTime<Utc>>,
        id_only: bool,
    ) -> Result<String, AppError> {
        let mut params = vec![
            ("ws.op", "find".to_string()),
            ("ws.size", page_size.to_string()),
        ];
        if let Some(since) = since {
            params.push((
                "subscribed_since",
                crate::time_utils::format_utc_rfc3339(since),
            ));
        }
        if id_only {
            params.push(("fields", "id".to_string()));
        }
        self.url_with_params(
            &format!("accounts/{account_id}/lists/{list_id}/subscribers"),
            &params,
        )
    }

    fn url_with_params(&self, path: &str, params: &[(&str, String)]) -> Result<String, AppError> {
        reqwest::Url::parse_with_params(&format!("{}/{}", self.base_url, path), params)
            .map(String::from)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Bad AWeber URL: {}", e)))
    }
}

/// Throttling: 429, or 403 whose body talks about a rate limit.
fn is_throttled(status: u16, body: &str) -> bool {
    match status {
        429 => true,
        403 => {
            let lower = body.to_ascii_lowercase();
            lower.contains("rate limit") || lower.contains("ratelimit")
        }
        _ => false,
    }
}

/// Retry-After in (possibly fractional) seconds. HTTP-date values are ignored.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Provider ids arrive as numbers or strings.
pub fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
