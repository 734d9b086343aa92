// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync engines and the clients they drive.

pub mod aggregation;
pub mod alerts;
pub mod aweber;
pub mod broadcasts;
pub mod jobs;
pub mod kms;
pub mod paginator;
pub mod retry;
pub mod subscribers;
pub mod tasks;
pub mod tokens;

pub use alerts::{AlertSink, Alerter, LogAlertSink, WebhookAlertSink};
pub use aweber::ApiClient;
pub use broadcasts::BroadcastSync;
pub use jobs::SyncJobs;
pub use kms::KmsService;
pub use paginator::Paginator;
pub use subscribers::SubscriberSync;
pub use tasks::{TaskQueue, TasksService};
pub use tokens::TokenManager;
