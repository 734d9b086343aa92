// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! AWeber OAuth token lifecycle.
//!
//! A valid token is obtained by probing the cached access token and
//! refreshing it only when the provider reports it expired. Expected
//! failures come back as [`AuthError`] values, never panics.

use crate::clock::Clock;
use crate::config::Config;
use crate::db::{state_keys, StateStore};
use crate::error::{AppError, AuthError};
use crate::models::credential::token_suffix;
use crate::models::{Credential, TokenResponse};
use crate::services::alerts::Alerter;
use crate::services::kms::KmsService;
use serde::Deserialize;
use std::sync::{Arc, Mutex};

/// Scopes requested at authorization time.
pub const SCOPES: &str =
    "account.read list.read email.read subscriber.read subscriber.read-extended";

/// Alert subject when the refresh token is rejected.
pub const REVOKED_ALERT_SUBJECT: &str = "AWeber authorization revoked";
/// Alert subject for any other refresh failure.
pub const REFRESH_FAILED_ALERT_SUBJECT: &str = "AWeber token refresh failed";

/// Result of the lightweight authenticated probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Valid,
    /// Provider answered 401: the access token needs a refresh
    Expired,
    /// Any other non-success status; the caller decides whether to retry
    Transient(u16),
}

/// Error body from the token endpoint.
#[derive(Debug, Default, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Owns the credential: load, probe, refresh, persist, purge.
#[derive(Clone)]
pub struct TokenManager {
    http: reqwest::Client,
    config: Arc<Config>,
    state: Arc<dyn StateStore>,
    kms: KmsService,
    alerter: Alerter,
    clock: Arc<dyn Clock>,
    /// Decrypted credential, shared across requests in this instance.
    cache: Arc<Mutex<Option<Credential>>>,
    /// Serializes refreshes so concurrent 401s trigger one token call.
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        config: Arc<Config>,
        state: Arc<dyn StateStore>,
        kms: KmsService,
        alerter: Alerter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            config,
            state,
            kms,
            alerter,
            clock,
            cache: Arc::new(Mutex::new(None)),
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Return an access token the provider currently accepts.
    ///
    /// 1. Load the credential (cache, then encrypted store)
    /// 2. Probe it
    /// 3. On 401, refresh; on any other failure, report a transient error
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let credential = self.load_credential().await?;
        tracing::debug!(token = %token_suffix(&credential.access_token), "Probing access token");

        match self.is_valid(&credential.access_token).await? {
            ProbeOutcome::Valid => Ok(credential.access_token),
            ProbeOutcome::Expired => {
                tracing::info!("Access token expired, refreshing");
                self.refresh(Some(&credential.access_token)).await
            }
            ProbeOutcome::Transient(status) => {
                tracing::warn!(status, "Token probe failed with non-auth status");
                Err(AuthError::ProbeFailed { status })
            }
        }
    }

    /// Probe `token` with a cheap authenticated GET. No side effects.
    pub async fn is_valid(&self, token: &str) -> Result<ProbeOutcome, AuthError> {
        let url = format!("{}/accounts", self.config.api_base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(match response.status().as_u16() {
            200..=299 => ProbeOutcome::Valid,
            401 => ProbeOutcome::Expired,
            other => ProbeOutcome::Transient(other),
        })
    }

    /// Exchange the stored refresh token for a new token pair.
    ///
    /// `stale` is the access token the caller saw rejected. If another task
    /// or instance already replaced it, that newer token is returned without
    /// another call to the token endpoint. The credential is always re-read
    /// from the store once the lock is held.
    pub async fn refresh(&self, stale: Option<&str>) -> Result<String, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.load_stored_credential().await?;
        if let Some(stale) = stale {
            if current.access_token != stale {
                tracing::debug!("Token already refreshed by another task");
                return Ok(current.access_token);
            }
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(
                &self.config.aweber_client_id,
                Some(&self.config.aweber_client_secret),
            )
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if status != 200 {
            let parsed: TokenErrorBody = serde_json::from_str(&body).unwrap_or_default();
            if parsed.error.as_deref() == Some("invalid_grant") {
                return self
                    .handle_invalid_grant(&current, parsed.error_description)
                    .await;
            }

            tracing::error!(status, body = %body, "Token refresh failed");
            self.alerter
                .alert(
                    REFRESH_FAILED_ALERT_SUBJECT,
                    &format!("Token endpoint returned HTTP {status}: {body}"),
                )
                .await;
            return Err(AuthError::RefreshFailed { status, body });
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::RefreshFailed {
                status,
                body: format!("unparsable token response: {e}"),
            }
        })?;

        let credential = Credential::from_response(
            token_response,
            Some(&current.refresh_token),
            self.clock.now(),
        )
        .ok_or_else(|| AuthError::RefreshFailed {
            status,
            body: "token response without refresh token".to_string(),
        })?;

        self.store_credential(&credential).await?;
        tracing::info!(token = %token_suffix(&credential.access_token), "Token refreshed");
        Ok(credential.access_token)
    }

    /// `invalid_grant` for `rejected`'s refresh token.
    ///
    /// Another instance may have rotated the token between our read and the
    /// token call; its credential is adopted. Only a rejected token that is
    /// still the stored one is treated as revoked.
    async fn handle_invalid_grant(
        &self,
        rejected: &Credential,
        description: Option<String>,
    ) -> Result<String, AuthError> {
        match self.load_stored_credential().await {
            Ok(latest) if latest.refresh_token != rejected.refresh_token => {
                tracing::info!(
                    token = %token_suffix(&latest.access_token),
                    "Refresh token rotated by another instance, using stored credential"
                );
                Ok(latest.access_token)
            }
            Ok(_) | Err(AuthError::MissingCredential) => {
                Err(self.handle_revoked(description).await)
            }
            Err(e) => Err(e),
        }
    }

    /// Terminal failure: purge everything so no further refresh is attempted.
    async fn handle_revoked(&self, description: Option<String>) -> AuthError {
        tracing::error!(
            description = description.as_deref().unwrap_or(""),
            "Refresh token rejected (invalid_grant); deleting stored credential"
        );

        self.clear_cache();
        if let Err(e) = self.state.delete(state_keys::CREDENTIAL).await {
            tracing::error!(error = %e, "Failed to delete revoked credential");
        }

        self.alerter
            .alert(
                REVOKED_ALERT_SUBJECT,
                "AWeber rejected the stored refresh token. Re-authorize the \
                 integration at /auth/aweber before the next scheduled sync.",
            )
            .await;

        AuthError::Revoked
    }

    // ─── Storage ─────────────────────────────────────────────────────────────

    async fn load_credential(&self) -> Result<Credential, AuthError> {
        if let Some(cached) = self.cached() {
            return Ok(cached);
        }
        self.load_stored_credential().await
    }

    /// Read and decrypt the stored credential, bypassing the cache.
    async fn load_stored_credential(&self) -> Result<Credential, AuthError> {
        let Some(sealed) = self
            .state
            .get(state_keys::CREDENTIAL)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?
        else {
            self.clear_cache();
            return Err(AuthError::MissingCredential);
        };

        let credential = match self.kms.open_credential(&sealed).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Stored credential is unreadable");
                self.alerter
                    .alert(REFRESH_FAILED_ALERT_SUBJECT, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        self.set_cache(Some(credential.clone()));
        Ok(credential)
    }

    async fn store_credential(&self, credential: &Credential) -> Result<(), AuthError> {
        let sealed = self
            .kms
            .seal_credential(credential)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        self.state
            .set(state_keys::CREDENTIAL, &sealed)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        self.set_cache(Some(credential.clone()));
        Ok(())
    }

    fn cached(&self) -> Option<Credential> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_cache(&self, credential: Option<Credential>) {
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = credential;
    }

    fn clear_cache(&self) {
        self.set_cache(None);
    }

    /// Newest access token this instance holds, falling back to `token`.
    ///
    /// Lets callers holding a token from before a refresh pick up its successor.
    pub fn latest_access_token(&self, token: &str) -> String {
        self.cached()
            .map(|c| c.access_token)
            .unwrap_or_else(|| token.to_string())
    }

    /// Whether a credential is stored (for diagnostics).
    pub async fn has_credential(&self) -> Result<bool, AppError> {
        Ok(self.state.get(state_keys::CREDENTIAL).await?.is_some())
    }

    /// Forget the credential; the next run requires re-authorization.
    pub async fn reset(&self) -> Result<(), AppError> {
        self.clear_cache();
        self.state.delete(state_keys::CREDENTIAL).await?;
        tracing::info!("Authorization reset");
        Ok(())
    }

    // ─── OAuth Authorization Code ────────────────────────────────────────────

    /// Provider consent URL carrying `state`.
    pub fn authorization_url(&self, state: &str) -> Result<String, AppError> {
        let url = reqwest::Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.config.aweber_client_id.as_str()),
                ("redirect_uri", self.config.aweber_redirect_uri.as_str()),
                ("scope", SCOPES),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Bad authorize URL: {}", e)))?;
        Ok(url.into())
    }

    /// Complete authorization: exchange `code` and store the credential.
    pub async fn exchange_code(&self, code: &str) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(
                &self.config.aweber_client_id,
                Some(&self.config.aweber_client_secret),
            )
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.aweber_redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status != 200 {
            tracing::error!(status, body = %body, "AWeber token exchange failed");
            return Err(AuthError::RefreshFailed { status, body });
        }

        let token_response: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::RefreshFailed {
                status,
                body: format!("unparsable token response: {e}"),
            })?;
        let credential = Credential::from_response(token_response, None, self.clock.now())
            .ok_or_else(|| AuthError::RefreshFailed {
                status,
                body: "token response without refresh token".to_string(),
            })?;

        self.store_credential(&credential).await?;
        tracing::info!(token = %token_suffix(&credential.access_token), "AWeber authorization stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryStore;
    use crate::services::alerts::LogAlertSink;
    use chrono::TimeZone;

    fn manager() -> TokenManager {
        let clock = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ));
        TokenManager::new(
            reqwest::Client::new(),
            Arc::new(Config::test_default()),
            Arc::new(MemoryStore::new()),
            KmsService::new_mock(),
            Alerter::new(Arc::new(LogAlertSink), clock.clone(), chrono::Duration::hours(1)),
            clock,
        )
    }

    #[tokio::test]
    async fn missing_credential_is_reported_without_network() {
        let err = manager().get_valid_token().await.unwrap_err();
        assert_eq!(err, AuthError::MissingCredential);
        assert!(err.is_terminal());
    }

    #[test]
    fn authorization_url_carries_scopes_and_state() {
        let url = manager().authorization_url("abc").unwrap();
        assert!(url.starts_with("http://localhost:9999/oauth2/authorize?"));
        assert!(url.contains("state=abc"));
        assert!(url.contains("scope=account.read+list.read"));
        assert!(url.contains("client_id=test_client_id"));
    }
}
