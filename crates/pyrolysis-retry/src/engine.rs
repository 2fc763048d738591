//! The retry/deadline engine: bounded exponential backoff over any
//! attempt closure that yields an HTTP response, with a hard wall-clock
//! deadline checked before every attempt and every sleep.
//!
//! The arithmetic (backoff duration, deadline comparison) is split into
//! plain functions so it can be unit tested without a clock or a network;
//! [`execute_with_retry`] wires those functions to real time and sleeps.

use std::future::Future;
use std::time::Duration;

use reqwest::Response;
use thiserror::Error;
use tracing::warn;

/// Statuses the caller has decided are worth retrying. The engine itself
/// has no opinion about which codes belong here; `{429, 500, 502, 503,
/// 504}` is the set both upstream fetchers use.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: f64,
    /// Absolute Unix timestamp after which no more work should happen.
    pub deadline_epoch: Option<i64>,
    pub min_attempt_budget_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_secs: f64) -> Self {
        Self {
            max_attempts,
            backoff_base_secs,
            deadline_epoch: None,
            min_attempt_budget_ms: 5_000,
        }
    }

    pub fn with_deadline(mut self, deadline_epoch: i64, min_attempt_budget_ms: u64) -> Self {
        self.deadline_epoch = Some(deadline_epoch);
        self.min_attempt_budget_ms = min_attempt_budget_ms;
        self
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("deadline exceeded with {remaining_ms}ms remaining")]
    DeadlineExceeded { remaining_ms: f64 },
    #[error("retry exhausted after {attempts} attempts, last status {last_status:?}")]
    RetryExhausted { attempts: u32, last_status: Option<u16> },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// `deadline_epoch - now - additional_secs < min_attempt_budget_ms/1000`.
/// Used both to gate the next attempt (`additional_secs = 0`) and to gate
/// the sleep before it (`additional_secs = sleep duration`).
pub fn would_exceed_deadline(
    now_epoch_secs: f64,
    additional_secs: f64,
    min_attempt_budget_ms: u64,
    deadline_epoch: Option<i64>,
) -> bool {
    match deadline_epoch {
        None => false,
        Some(deadline) => {
            let budget_secs = min_attempt_budget_ms as f64 / 1000.0;
            (deadline as f64) - now_epoch_secs - additional_secs < budget_secs
        }
    }
}

/// `backoff_base * 2^(attempt-1)`, overridden by `retry_after` (parsed
/// from a `Retry-After` header) when present.
pub fn backoff_seconds(attempt: u32, backoff_base_secs: f64, retry_after: Option<f64>) -> f64 {
    retry_after.unwrap_or_else(|| backoff_base_secs * 2f64.powi(attempt as i32 - 1))
}

fn parse_retry_after(response: &Response) -> Option<f64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
}

fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Runs `attempt` up to `policy.max_attempts` times. `attempt` receives
/// the 1-indexed attempt number and must perform exactly one HTTP call.
///
/// Returns the first response whose status is not in `retryable_statuses`
/// (success or a non-retryable error, left for the caller to interpret),
/// or a [`RetryError`] if the deadline is hit or attempts are exhausted.
pub async fn execute_with_retry<F, Fut>(
    policy: RetryPolicy,
    retryable_statuses: &[u16],
    mut attempt: F,
) -> Result<Response, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut last_status: Option<u16> = None;

    for attempt_number in 1..=policy.max_attempts {
        let now = now_epoch_secs();
        if would_exceed_deadline(now, 0.0, policy.min_attempt_budget_ms, policy.deadline_epoch) {
            let remaining_ms = policy
                .deadline_epoch
                .map(|d| (d as f64 - now) * 1000.0)
                .unwrap_or(0.0);
            return Err(RetryError::DeadlineExceeded { remaining_ms });
        }

        let response = attempt(attempt_number).await?;
        let status = response.status().as_u16();

        if !retryable_statuses.contains(&status) {
            return Ok(response);
        }

        last_status = Some(status);
        let retry_after = parse_retry_after(&response);
        drop(response);

        if attempt_number >= policy.max_attempts {
            break;
        }

        let sleep_secs = backoff_seconds(attempt_number, policy.backoff_base_secs, retry_after);
        let now = now_epoch_secs();
        if would_exceed_deadline(now, sleep_secs, policy.min_attempt_budget_ms, policy.deadline_epoch) {
            let remaining_ms = policy
                .deadline_epoch
                .map(|d| (d as f64 - now) * 1000.0)
                .unwrap_or(0.0);
            return Err(RetryError::DeadlineExceeded { remaining_ms });
        }

        warn!(attempt = attempt_number, status, sleep_secs, "retryable status, backing off");
        tokio::time::sleep(Duration::from_secs_f64(sleep_secs.max(0.0))).await;
    }

    Err(RetryError::RetryExhausted { attempts: policy.max_attempts, last_status })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_seconds(1, 0.5, None), 0.5);
        assert_eq!(backoff_seconds(2, 0.5, None), 1.0);
        assert_eq!(backoff_seconds(3, 0.5, None), 2.0);
    }

    #[test]
    fn retry_after_overrides_backoff() {
        assert_eq!(backoff_seconds(3, 0.5, Some(7.5)), 7.5);
    }

    #[test]
    fn deadline_safety_never_permits_a_sleep_past_budget() {
        let deadline = 1_000_000_i64;
        let now = 999_996.0; // 4 seconds of runway
        let min_budget_ms = 2_000; // need 2s of runway after the action
        // A 3s sleep would land with 1s left after, under the 2s budget.
        assert!(would_exceed_deadline(now, 3.0, min_budget_ms, Some(deadline)));
        // A 1s sleep leaves 3s, comfortably over budget.
        assert!(!would_exceed_deadline(now, 1.0, min_budget_ms, Some(deadline)));
    }

    #[test]
    fn no_deadline_never_exceeds() {
        assert!(!would_exceed_deadline(0.0, 1e9, 1, None));
    }
}
