//! The tile processor: claim → checkpoint-or-fetch+upload+checkpoint →
//! deadline check → analyze → complete/fail → bump run counters. One call
//! to [`Processor::process`] handles exactly one queue message and never
//! panics on a classifiable failure — every upstream error is recorded on
//! the job and folded into the run counters before returning.

use std::time::Duration;

use pyrolysis_models::{error_code_from_http_status, timeout_error_code, ErrorCode, Provider, TileJobMessage};
use pyrolysis_retry::{fetch_google_tile, fetch_mapbox_tile, FetchError, RetryPolicy, SecretCache};
use pyrolysis_store::{RunsRepository, TileJobsRepository};
use reqwest::Client;
use thiserror::Error;

use crate::logging::timed_stage;
use crate::object_store::{google_coord_key, mapbox_tile_key, ObjectStore};
use crate::vision::VisionClient;

/// Once less than this much time remains before the deadline, the
/// processor fails the job rather than starting the vision call — an
/// OpenAI request that gets cut off mid-flight wastes the attempt and the
/// quota with nothing to show for it.
pub const MIN_REMAINING_MS_FOR_VISION: i64 = 20_000;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("store error: {0}")]
    Store(#[from] pyrolysis_store::DbError),
    #[error("object store error: {0}")]
    ObjectStore(#[from] crate::object_store::ObjectStoreError),
    #[error("vision error: {0}")]
    Vision(#[from] crate::vision::VisionError),
}

/// What happened to one job, after the terminal write has already landed.
/// Always `Ok` from [`Processor::process`]'s perspective — a classified
/// upstream failure is a successful *processing* of the message, just an
/// unsuccessful *tile*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Failed,
    AlreadyCompleted,
    LockedByOther,
}

pub struct Processor {
    pub runs: RunsRepository,
    pub tile_jobs: TileJobsRepository,
    pub object_store: ObjectStore,
    pub vision: VisionClient,
    pub secrets: SecretCache,
    pub http: Client,
    pub bucket: String,
    pub max_retries: u32,
    pub backoff_base_secs: f64,
    pub lock_seconds: i64,
    pub request_timeout: Duration,
}

impl Processor {
    /// Processes one already-parsed message through to a terminal write.
    /// `deadline_epoch` is the absolute Unix time the caller's invocation
    /// (Lambda timeout, shutdown signal, …) must finish by.
    pub async fn process(
        &self,
        message: &TileJobMessage,
        deadline_epoch: i64,
    ) -> Result<ProcessOutcome, ProcessError> {
        let now = now_epoch();
        let tile_id = message.tile_id();

        let claim = self.tile_jobs.claim(message, now, self.lock_seconds).await?;

        match claim.result {
            pyrolysis_models::ClaimResult::AlreadyCompleted => return Ok(ProcessOutcome::AlreadyCompleted),
            pyrolysis_models::ClaimResult::LockedByOther => return Ok(ProcessOutcome::LockedByOther),
            pyrolysis_models::ClaimResult::Claimed => {}
        }

        let attempt = claim.attempt.unwrap_or(1) as u32;
        let claimed_at = claim.claimed_at_epoch;

        let key = match message.imagery_source {
            pyrolysis_models::ImagerySource::Mapbox => mapbox_tile_key(
                &message.run_id,
                message.z.expect("claimed mapbox message has z"),
                message.x.expect("claimed mapbox message has x"),
                message.y.expect("claimed mapbox message has y"),
            ),
            pyrolysis_models::ImagerySource::Google => google_coord_key(
                &message.run_id,
                message.lat.expect("claimed google message has lat"),
                message.lon.expect("claimed google message has lon"),
                message.effective_zoom(),
            ),
        };

        let checkpoint = match claim.checkpoint {
            Some(checkpoint) => checkpoint,
            None => {
                let fetch_result = timed_stage("fetch_and_upload", &message.run_id, &tile_id, attempt, || {
                    self.fetch_and_upload(message, &key, deadline_epoch)
                })
                .await;

                match fetch_result {
                    Ok(checkpoint) => checkpoint,
                    Err(err) => {
                        self.record_fetch_failure(&message.run_id, &tile_id, &err).await?;
                        return Ok(ProcessOutcome::Failed);
                    }
                }
            }
        };

        let remaining_ms = (deadline_epoch - now_epoch()) * 1000;
        if remaining_ms < MIN_REMAINING_MS_FOR_VISION {
            self.tile_jobs
                .fail_job(&message.run_id, &tile_id, ErrorCode::DeadlineExceeded.as_str(), "deadline exceeded before vision analysis", now_epoch())
                .await?;
            self.runs.update_run_counters(&message.run_id, 0, 1).await?;
            return Ok(ProcessOutcome::Failed);
        }

        let analysis: Result<_, ProcessError> = timed_stage("analyze", &message.run_id, &tile_id, attempt, || async {
            let bytes = self.object_store.download_image(&self.bucket, &checkpoint.key).await?;
            let analysis = self
                .vision
                .analyze_tile(&bytes, mime_type_of(message.imagery_source), "Does this tile show visible evidence of active surface mining?")
                .await?;
            Ok(analysis)
        })
        .await;

        match analysis {
            Ok(analysis) => {
                self.tile_jobs
                    .complete_job(
                        &message.run_id,
                        &tile_id,
                        &checkpoint.bucket,
                        &checkpoint.key,
                        Some(analysis.verdict.as_str()),
                        Some(analysis.reasoning.as_str()),
                        Some(&analysis.usage),
                        claimed_at,
                        now_epoch(),
                    )
                    .await?;
                self.runs.update_run_counters(&message.run_id, 1, 0).await?;
                Ok(ProcessOutcome::Completed)
            }
            Err(err) => {
                self.tile_jobs
                    .fail_job(&message.run_id, &tile_id, err.error_code().as_str(), &err.to_string(), now_epoch())
                    .await?;
                self.runs.update_run_counters(&message.run_id, 0, 1).await?;
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    async fn fetch_and_upload(
        &self,
        message: &TileJobMessage,
        key: &str,
        deadline_epoch: i64,
    ) -> Result<pyrolysis_models::S3Checkpoint, FetchError> {
        let policy = RetryPolicy::new(self.max_retries, self.backoff_base_secs)
            .with_deadline(deadline_epoch, 5_000);

        let bytes = match message.imagery_source {
            pyrolysis_models::ImagerySource::Mapbox => {
                fetch_mapbox_tile(
                    &self.http,
                    &self.secrets,
                    message.z.expect("claimed mapbox message has z"),
                    message.x.expect("claimed mapbox message has x"),
                    message.y.expect("claimed mapbox message has y"),
                    policy,
                    self.request_timeout,
                )
                .await?
            }
            pyrolysis_models::ImagerySource::Google => {
                fetch_google_tile(
                    &self.http,
                    &self.secrets,
                    message.lat.expect("claimed google message has lat"),
                    message.lon.expect("claimed google message has lon"),
                    message.effective_zoom(),
                    policy,
                    self.request_timeout,
                )
                .await?
            }
        };

        self.object_store
            .upload_tile_image(&self.bucket, key, bytes, mime_type_of(message.imagery_source))
            .await
            .map_err(|_| FetchError::NoStatus { provider: provider_of(message) })?;

        self.tile_jobs
            .checkpoint_s3(&message.run_id, &message.tile_id(), &self.bucket, key)
            .await
            .map_err(|_| FetchError::NoStatus { provider: provider_of(message) })?;

        Ok(pyrolysis_models::S3Checkpoint { bucket: self.bucket.clone(), key: key.to_string() })
    }

    async fn record_fetch_failure(&self, run_id: &str, tile_id: &str, err: &FetchError) -> Result<(), ProcessError> {
        let code = match err.provider() {
            Some(provider) => match err.status() {
                Some(status) => error_code_from_http_status(provider, status),
                None if err.is_deadline() => ErrorCode::DeadlineExceeded,
                None => timeout_error_code(provider),
            },
            None => ErrorCode::UnknownError,
        };

        self.tile_jobs.fail_job(run_id, tile_id, code.as_str(), &err.to_string(), now_epoch()).await?;
        self.runs.update_run_counters(run_id, 0, 1).await?;
        Ok(())
    }
}

fn provider_of(message: &TileJobMessage) -> Provider {
    match message.imagery_source {
        pyrolysis_models::ImagerySource::Mapbox => Provider::Mapbox,
        pyrolysis_models::ImagerySource::Google => Provider::Google,
    }
}

/// The actual image encoding each provider's imagery is stored and sent as.
fn mime_type_of(source: pyrolysis_models::ImagerySource) -> &'static str {
    match source {
        pyrolysis_models::ImagerySource::Mapbox => "image/jpeg",
        pyrolysis_models::ImagerySource::Google => "image/png",
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Error-code mapping for failures the fetchers' own
/// [`error_code_from_http_status`] doesn't cover: vision-model responses
/// and object-store/DB failures that carry no upstream-provider status.
trait ErrorCodeExt {
    fn error_code(&self) -> ErrorCode;
}

impl ErrorCodeExt for crate::vision::VisionError {
    fn error_code(&self) -> ErrorCode {
        match self {
            crate::vision::VisionError::Status(status) => {
                error_code_from_http_status(Provider::Openai, *status)
            }
            crate::vision::VisionError::MalformedResponse(_) => ErrorCode::OpenaiBadResponse,
            crate::vision::VisionError::Request(err) if err.is_timeout() => {
                timeout_error_code(Provider::Openai)
            }
            crate::vision::VisionError::Request(_) => ErrorCode::UnknownError,
        }
    }
}

impl ErrorCodeExt for ProcessError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ProcessError::Vision(err) => err.error_code(),
            ProcessError::ObjectStore(_) => ErrorCode::S3GetFailed,
            ProcessError::Store(_) => ErrorCode::UnknownError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_remaining_budget_is_twenty_seconds() {
        assert_eq!(MIN_REMAINING_MS_FOR_VISION, 20_000);
    }

    #[test]
    fn malformed_vision_response_maps_to_bad_response_code() {
        let err = crate::vision::VisionError::MalformedResponse("missing content".into());
        assert_eq!(err.error_code(), ErrorCode::OpenaiBadResponse);
    }

    #[test]
    fn vision_status_maps_through_the_shared_http_classifier() {
        let err = crate::vision::VisionError::Status(429);
        assert_eq!(err.error_code(), ErrorCode::OpenaiTooManyRequests);
    }
}
