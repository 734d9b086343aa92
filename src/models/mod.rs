// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod broadcast;
pub mod credential;
pub mod stats;
pub mod subscriber;

pub use broadcast::{BroadcastDetail, BroadcastRecord, BroadcastStats};
pub use credential::{Credential, TokenResponse};
pub use stats::{compute_trailing_months, MonthlyAggregate};
pub use subscriber::{ApiSubscriber, SubscriberRecord};
