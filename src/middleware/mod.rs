// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (scheduler authentication, security headers).

pub mod security;
pub mod tasks_auth;

pub use tasks_auth::{require_scheduler_token, token_matches};
