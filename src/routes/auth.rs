// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! AWeber OAuth authorization routes.
//!
//! `/auth/aweber` is for the operator only (it requires the scheduler
//! token in the `x-scheduler-token` header, never in the URL); the callback
//! is protected by the signed `state`.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Redirect,
    routing::get,
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::token_matches;
use crate::services::tasks::SCHEDULER_TOKEN_HEADER;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// How long a signed state stays acceptable.
fn state_max_age() -> chrono::Duration {
    chrono::Duration::minutes(15)
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/aweber", get(auth_start))
        .route("/auth/aweber/callback", get(auth_callback))
}

/// Start OAuth flow - redirect to the AWeber consent page.
async fn auth_start(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Redirect> {
    let presented = headers
        .get(SCHEDULER_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());
    if !token_matches(&state.config.scheduler_token, presented) {
        tracing::warn!("Rejected authorization start without operator key");
        return Err(AppError::Unauthorized);
    }

    let oauth_state = sign_state(&state.config.oauth_state_key, state.clock.now())?;
    let url = state.tokens.authorization_url(&oauth_state)?;

    tracing::info!(client_id = %state.config.aweber_client_id, "Redirecting operator to AWeber consent");
    Ok(Redirect::temporary(&url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange the code and store the credential.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<&'static str> {
    let signed = params.state.as_deref().unwrap_or_default();
    if !verify_state(signed, &state.config.oauth_state_key, state.clock.now()) {
        return Err(AppError::BadRequest("invalid or expired state".to_string()));
    }

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "AWeber declined authorization");
        return Err(AppError::BadRequest(format!("authorization declined: {error}")));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing code".to_string()))?;

    tracing::info!("Exchanging authorization code for tokens");
    state.tokens.exchange_code(&code).await?;

    Ok("AWeber authorization stored. Sync jobs can run now.")
}

/// Build `base64url("nonce_hex|timestamp_hex|signature_hex")`.
fn sign_state(secret: &[u8], now: DateTime<Utc>) -> Result<String> {
    let mut nonce = [0u8; 16];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Random source unavailable")))?;

    let payload = format!("{}|{:x}", hex::encode(nonce), now.timestamp_millis());

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(URL_SAFE_NO_PAD.encode(format!("{payload}|{signature}")))
}

/// Check signature and age of a state produced by [`sign_state`].
fn verify_state(state: &str, secret: &[u8], now: DateTime<Utc>) -> bool {
    let Some(decoded) = URL_SAFE_NO_PAD
        .decode(state)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    else {
        return false;
    };

    let parts: Vec<&str> = decoded.splitn(3, '|').collect();
    let [nonce_hex, timestamp_hex, signature_hex] = parts.as_slice() else {
        return false;
    };

    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(format!("{nonce_hex}|{timestamp_hex}").as_bytes());
    if mac.verify_slice(&signature).is_err() {
        tracing::error!("OAuth state signature mismatch");
        return false;
    }

    let issued = i64::from_str_radix(timestamp_hex, 16)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    match issued {
        Some(issued) if issued <= now && now - issued <= state_max_age() => true,
        _ => {
            tracing::warn!("OAuth state expired");
            false
        }
    }
}
