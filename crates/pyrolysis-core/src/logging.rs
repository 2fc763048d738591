//! Structured logging helpers. `init_logging` wires `tracing-subscriber`
//! the way the teacher's binaries do; `timed_stage` ports the original
//! `timed_stage` contextmanager, emitting one structured event per stage
//! with its outcome and duration, on both the success and failure path.

use std::future::Future;
use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(false)
        .init();
}

/// Runs `body`, logging a single structured event recording `run_id`,
/// `tile_id`, `attempt`, `stage` and the elapsed milliseconds — on
/// success at `info` level, on failure at `error` level with the error's
/// `Display` text attached. The error is returned untouched so callers
/// can still match on it.
pub async fn timed_stage<F, Fut, T, E>(
    stage: &str,
    run_id: &str,
    tile_id: &str,
    attempt: u32,
    body: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = body().await;
    let dur_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => {
            info!(
                run_id,
                tile_id, attempt, stage, dur_ms, outcome = "ok", "stage completed"
            );
        }
        Err(err) => {
            error!(
                run_id,
                tile_id,
                attempt,
                stage,
                dur_ms,
                outcome = "error",
                error = %err,
                "stage failed"
            );
        }
    }

    result
}
