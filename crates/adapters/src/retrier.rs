// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry helper shared by the provisioner and the watchdog's cleanup.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Retries a fallible async operation with a fixed sleep between attempts.
///
/// Bounded either by an attempt budget (`attempts`) or by a wall-clock
/// window (`deadline`). The last error is returned once the budget is
/// exhausted.
#[derive(Debug, Clone, Copy)]
pub struct Retrier {
    max_attempts: Option<u32>,
    window: Option<Duration>,
    sleep: Duration,
}

impl Retrier {
    /// Retry up to `max_attempts` extra attempts beyond the first.
    pub fn attempts(max_attempts: u32, sleep: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            window: None,
            sleep,
        }
    }

    /// Keep retrying until `window` has elapsed.
    pub fn deadline(window: Duration, sleep: Duration) -> Self {
        Self {
            max_attempts: None,
            window: Some(window),
            sleep,
        }
    }

    /// Run `op` until it succeeds or the budget runs out.
    ///
    /// `retryable` decides whether an error is worth another attempt;
    /// non-retryable errors surface immediately.
    pub async fn run<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let budget_left = match (self.max_attempts, self.window) {
                        (Some(max), _) => attempt <= max,
                        (None, Some(window)) => started.elapsed() < window,
                        (None, None) => false,
                    };
                    if !budget_left {
                        return Err(e);
                    }
                    tracing::warn!(attempt, error = %e, "retrying after transient error");
                    tokio::time::sleep(self.sleep).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retrier_tests.rs"]
mod tests;
