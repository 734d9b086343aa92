// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud KMS encryption of the stored AWeber credential.
//!
//! The whole credential record is serialized to JSON and encrypted with a
//! single direct KMS call; the ciphertext is stored base64-encoded.

use crate::error::{AppError, AuthError};
use crate::models::Credential;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// KMS encryption service.
#[derive(Clone)]
pub struct KmsService {
    /// Format: projects/{project}/locations/{location}/keyRings/{ring}/cryptoKeys/{key}
    key_path: String,

    client: Option<std::sync::Arc<google_cloud_kms::client::Client>>,
}

impl KmsService {
    const KEY_RING_NAME: &str = "aweber-sync";

    /// Key used for the OAuth credential.
    pub const CREDENTIAL_KEY_NAME: &str = "credential-encryption";

    /// Connect to GCP KMS.
    pub async fn new(project_id: &str, location: &str, key_name: &str) -> Result<Self, AppError> {
        let key_path = format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            project_id,
            location,
            Self::KEY_RING_NAME,
            key_name
        );

        let config = google_cloud_kms::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS auth config: {}", e))
            })?;

        let client = google_cloud_kms::client::Client::new(config)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS client: {}", e))
            })?;

        tracing::info!(key = %key_path, "KMS client ready");

        Ok(Self {
            key_path,
            client: Some(std::sync::Arc::new(client)),
        })
    }

    /// Mock KMS for tests and local runs: base64 only, no encryption.
    /// Only available in debug/test builds.
    #[cfg(debug_assertions)]
    pub fn new_mock() -> Self {
        Self {
            key_path: "projects/mock/locations/mock/keyRings/mock/cryptoKeys/mock".to_string(),
            client: None,
        }
    }

    /// Encrypt plaintext; returns base64-encoded ciphertext.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::EncryptRequest;

        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                return Ok(BASE64.encode(plaintext));
            }
        }

        // In release builds a missing client is an error, never a passthrough.
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let req = EncryptRequest {
            name: self.key_path.clone(),
            plaintext: plaintext.as_bytes().to_vec(),
            ..Default::default()
        };

        let response = client
            .encrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS encrypt failed: {}", e)))?;

        Ok(BASE64.encode(response.ciphertext))
    }

    /// Decrypt base64-encoded ciphertext.
    pub async fn decrypt(&self, ciphertext_b64: &str) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::DecryptRequest;

        let ciphertext = BASE64
            .decode(ciphertext_b64.trim())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Base64 decode failed: {}", e)))?;

        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                return String::from_utf8(ciphertext).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("UTF-8 decode failed (mock): {}", e))
                });
            }
        }

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let req = DecryptRequest {
            name: self.key_path.clone(),
            ciphertext,
            ..Default::default()
        };

        let response = client
            .decrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS decrypt failed: {}", e)))?;

        String::from_utf8(response.plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed: {}", e)))
    }

    /// Serialize and encrypt a credential for storage.
    pub async fn seal_credential(&self, credential: &Credential) -> Result<String, AppError> {
        let json = serde_json::to_string(credential)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Credential encode failed: {}", e)))?;
        self.encrypt(&json).await
    }

    /// Decrypt and parse a stored credential.
    ///
    /// Anything that cannot be turned back into a credential is reported as
    /// [`AuthError::CorruptCredential`].
    pub async fn open_credential(&self, sealed: &str) -> Result<Credential, AuthError> {
        let json = self
            .decrypt(sealed)
            .await
            .map_err(|e| AuthError::CorruptCredential(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| AuthError::CorruptCredential(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn mock_kms_round_trips_credentials() {
        let kms = KmsService::new_mock();
        let credential = Credential {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_type: "bearer".into(),
            expires_at: None,
            scope: Some("account.read".into()),
            obtained_at: chrono::Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        };

        let sealed = kms.seal_credential(&credential).await.unwrap();
        assert!(!sealed.contains("refresh"));

        let opened = kms.open_credential(&sealed).await.unwrap();
        assert!(opened == credential);
    }

    #[tokio::test]
    async fn garbage_is_a_corrupt_credential() {
        let kms = KmsService::new_mock();

        let not_base64 = kms.open_credential("%%%").await.unwrap_err();
        assert!(matches!(not_base64, AuthError::CorruptCredential(_)));

        let not_json = kms.open_credential(&BASE64.encode("{oops")).await.unwrap_err();
        assert!(matches!(not_json, AuthError::CorruptCredential(_)));
    }
}
