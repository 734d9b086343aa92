// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bounded retry with exponential backoff.

use crate::clock::Clock;
use crate::error::AppError;
use std::future::Future;
use std::time::Duration;

/// Delay before retry number `retry` (0-based): `base * 2^retry`.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
}

/// Run `op` up to `attempts` times, sleeping with doubling delays between tries.
///
/// Run-fatal errors (see [`AppError::is_run_fatal`]) are returned at once.
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    clock: &dyn Clock,
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_run_fatal() || attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = backoff_delay(base_delay, attempt - 1);
                tracing::warn!(
                    attempt,
                    remaining = attempts - attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
