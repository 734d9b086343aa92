// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth credential for the AWeber API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token pair and expiry metadata, stored encrypted under a single state key.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// When the access token expires, if the provider said
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Option<String>,
    /// When this token pair was issued
    pub obtained_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

// Hand-written so tokens never reach logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &token_suffix(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("obtained_at", &self.obtained_at)
            .finish_non_exhaustive()
    }
}

/// Token endpoint response for both the authorization-code and refresh grants.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Omitted by some refresh responses; the previous one stays valid
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Credential {
    /// Build a credential from a token response.
    ///
    /// `previous_refresh` is kept when the response carries no new refresh token.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))?;

        Some(Self {
            access_token: response.access_token,
            refresh_token,
            token_type: response.token_type.unwrap_or_else(default_token_type),
            expires_at: response
                .expires_in
                .map(|secs| now + chrono::Duration::seconds(secs)),
            scope: response.scope,
            obtained_at: now,
        })
    }
}

/// Last four characters of a token, for log lines.
pub fn token_suffix(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let start = chars.len().saturating_sub(4);
    format!("…{}", chars[start..].iter().collect::<String>())
}
