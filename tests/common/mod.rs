// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use async_trait::async_trait;
use aweber_sync::clock::ManualClock;
use aweber_sync::config::Config;
use aweber_sync::db::{state_keys, FirestoreDb, MemoryStore, StateStore};
use aweber_sync::error::AppError;
use aweber_sync::models::Credential;
use aweber_sync::routes::create_router;
use aweber_sync::services::tasks::ContinuationPayload;
use aweber_sync::services::{AlertSink, Alerter, ApiClient, KmsService, TaskQueue, TokenManager};
use aweber_sync::{AppState, Backends};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ACCOUNT_ID: &str = "1001";
pub const ACCESS_TOKEN: &str = "access-token-1";
pub const REFRESH_TOKEN: &str = "refresh-token-1";
pub const API_PREFIX: &str = "/1.0";

/// Check if emulator is available via environment variable.
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Fixed "now" for every test.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

/// Alert sink that remembers what it was given.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<(String, String)>>);

impl RecordingSink {
    pub fn subjects(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        self.0
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Task queue that records continuations instead of calling Cloud Tasks.
#[derive(Default)]
pub struct RecordingQueue(Mutex<Vec<(String, ContinuationPayload)>>);

impl RecordingQueue {
    pub fn queued(&self) -> Vec<(String, ContinuationPayload)> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn queue_continuation(
        &self,
        endpoint: &str,
        payload: &ContinuationPayload,
    ) -> Result<(), AppError> {
        self.0
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload.clone()));
        Ok(())
    }
}

/// Mock AWeber plus in-memory storage and a manual clock.
pub struct Harness {
    pub server: MockServer,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub alerts: Arc<RecordingSink>,
    pub queue: Arc<RecordingQueue>,
    pub config: Config,
    pub kms: KmsService,
}

impl Harness {
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let mut config = Config::test_default();
        config.api_base_url = format!("{}{}", server.uri(), API_PREFIX);
        config.token_url = format!("{}/oauth2/token", server.uri());
        config.authorize_url = format!("{}/oauth2/authorize", server.uri());
        config.service_url = Some("https://sync.example".to_string());

        Self {
            server,
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(start_time())),
            alerts: Arc::new(RecordingSink::default()),
            queue: Arc::new(RecordingQueue::default()),
            config,
            kms: KmsService::new_mock(),
        }
    }

    /// Absolute URL of an API path on the mock server.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.server.uri(), API_PREFIX, path)
    }

    pub fn alerter(&self) -> Alerter {
        Alerter::new(
            self.alerts.clone(),
            self.clock.clone(),
            self.config.sync.alert_debounce,
        )
    }

    pub fn token_manager(&self) -> TokenManager {
        TokenManager::new(
            reqwest::Client::new(),
            Arc::new(self.config.clone()),
            self.store.clone(),
            self.kms.clone(),
            self.alerter(),
            self.clock.clone(),
        )
    }

    pub fn api_client(&self, tokens: TokenManager) -> ApiClient {
        ApiClient::new(
            reqwest::Client::new(),
            &self.config.api_base_url,
            tokens,
            self.clock.clone(),
            Arc::new(self.config.sync.clone()),
        )
    }

    pub fn app_state(&self) -> Arc<AppState> {
        self.app_state_with_tasks(Some(self.queue.clone() as Arc<dyn TaskQueue>))
    }

    /// App state with a specific continuation queue, or none at all.
    pub fn app_state_with_tasks(&self, tasks: Option<Arc<dyn TaskQueue>>) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.config.clone(),
            Backends {
                tables: self.store.clone(),
                state: self.store.clone(),
                kms: self.kms.clone(),
                alerts: self.alerts.clone(),
                tasks,
            },
            self.clock.clone(),
        ))
    }

    /// Router plus the state behind it.
    pub fn app(&self) -> (axum::Router, Arc<AppState>) {
        let state = self.app_state();
        (create_router(state.clone()), state)
    }

    /// Store an encrypted credential holding the default token pair.
    pub async fn seed_credential(&self) {
        let credential = Credential {
            access_token: ACCESS_TOKEN.to_string(),
            refresh_token: REFRESH_TOKEN.to_string(),
            token_type: "bearer".to_string(),
            expires_at: None,
            scope: None,
            obtained_at: start_time(),
        };
        let sealed = self.kms.seal_credential(&credential).await.unwrap();
        self.store
            .set(state_keys::CREDENTIAL, &sealed)
            .await
            .unwrap();
    }

    /// Decrypt whatever credential is stored.
    pub async fn stored_credential(&self) -> Option<Credential> {
        let sealed = self.store.get(state_keys::CREDENTIAL).await.unwrap()?;
        Some(self.kms.open_credential(&sealed).await.unwrap())
    }

    /// `/accounts` answers with one account (also serves the token probe).
    pub async fn mount_account(&self) {
        Mock::given(method("GET"))
            .and(path(format!("{API_PREFIX}/accounts")))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection(
                vec![json!({ "id": ACCOUNT_ID.parse::<u64>().unwrap() })],
                None,
            )))
            .mount(&self.server)
            .await;
    }

    /// `/accounts/{id}/lists` answers with the given list ids.
    pub async fn mount_lists(&self, list_ids: &[&str]) {
        let entries: Vec<Value> = list_ids.iter().map(|id| json!({ "id": id })).collect();
        Mock::given(method("GET"))
            .and(path(format!("{API_PREFIX}/accounts/{ACCOUNT_ID}/lists")))
            .respond_with(ResponseTemplate::new(200).set_body_json(collection(entries, None)))
            .mount(&self.server)
            .await;
    }
}

/// A collection page body.
pub fn collection(entries: Vec<Value>, next: Option<String>) -> Value {
    let total_size = entries.len();
    let mut body = json!({
        "entries": entries,
        "total_size": total_size,
    });
    if let Some(next) = next {
        body["next_collection_link"] = Value::String(next);
    }
    body
}

/// A subscriber entry as the provider returns it.
pub fn subscriber(id: u64, subscribed_at: &str, unsubscribed_at: Option<&str>) -> Value {
    json!({
        "id": id,
        "subscribed_at": subscribed_at,
        "unsubscribed_at": unsubscribed_at,
    })
}
