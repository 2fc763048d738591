//! `TileJobs` table operations: the claim & checkpoint protocol plus the
//! two terminal writes. This module is the heart of the system — a
//! correct implementation here is what makes retries and concurrent
//! workers converge on exactly-once durable completion.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;
use tracing::{info, instrument, warn};

use pyrolysis_models::{ClaimOutcome, JobStatus, S3Checkpoint, TileJobMessage};

use crate::av::{get_n_u64, get_s, json_to_av, n, s};
use crate::client::DynamoStoreClient;
use crate::errors::DbError;

/// Error message bodies are capped before being written to the store so a
/// single pathological upstream response cannot blow out item size.
const ERROR_MESSAGE_MAX_BYTES: usize = 500;

#[derive(Clone)]
pub struct TileJobsRepository {
    client: DynamoStoreClient,
    table_name: String,
}

fn job_key(run_id: &str, tile_id: &str) -> HashMap<String, AttributeValue> {
    HashMap::from([
        ("run_id".to_string(), s(run_id)),
        ("tile_id".to_string(), s(tile_id)),
    ])
}

fn truncate_error_message(message: &str) -> String {
    if message.len() <= ERROR_MESSAGE_MAX_BYTES {
        return message.to_string();
    }
    let mut end = ERROR_MESSAGE_MAX_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

impl TileJobsRepository {
    pub fn new(client: DynamoStoreClient, table_name: impl Into<String>) -> Self {
        Self { client, table_name: table_name.into() }
    }

    /// Re-reads just `status` for a job that lost the claim CAS, to
    /// distinguish `AlreadyCompleted` from `LockedByOther`. A failure to
    /// re-read (itself an edge case — a transient fault right after a
    /// conditional check failure) is treated as `LockedByOther`, the more
    /// conservative, retryable outcome, rather than surfacing a second,
    /// differently-shaped error from a function whose contract promises a
    /// `ClaimOutcome`.
    async fn current_status(&self, run_id: &str, tile_id: &str) -> Option<JobStatus> {
        let response = self
            .client
            .inner()
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(job_key(run_id, tile_id)))
            .projection_expression("#status")
            .expression_attribute_names("#status", "status")
            .send()
            .await
            .ok()?;

        let item = response.item?;
        get_s(&item, "status").and_then(|s| JobStatus::parse(&s))
    }

    /// Attempts to claim `message` for processing. See the claim
    /// predicate and post-image mutation in the module-level docs; this
    /// function is a direct translation of that single conditional
    /// `UpdateItem` call.
    #[instrument(skip(self, message))]
    pub async fn claim(
        &self,
        message: &TileJobMessage,
        now_epoch: i64,
        lock_seconds: i64,
    ) -> Result<ClaimOutcome, DbError> {
        let tile_id = message.tile_id();
        let lock_until = now_epoch + lock_seconds;

        let mut update_expr = String::from(
            "SET #status = :processing, \
             attempts = if_not_exists(attempts, :zero) + :one, \
             lock_until_epoch = :lock, \
             started_at_epoch = if_not_exists(started_at_epoch, :now), \
             last_claimed_at_epoch = :last_claimed, \
             imagery_source = if_not_exists(imagery_source, :source)",
        );

        let mut request = self
            .client
            .inner()
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(job_key(&message.run_id, &tile_id)))
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":processing", s(JobStatus::Processing.as_str()))
            .expression_attribute_values(":pending", s(JobStatus::Pending.as_str()))
            .expression_attribute_values(":failed", s(JobStatus::Failed.as_str()))
            .expression_attribute_values(":now", n(now_epoch))
            .expression_attribute_values(":lock", n(lock_until))
            .expression_attribute_values(":one", n(1))
            .expression_attribute_values(":zero", n(0))
            .expression_attribute_values(":source", s(message.imagery_source.as_str()))
            .expression_attribute_values(":last_claimed", n(now_epoch));

        match (message.z, message.x, message.y) {
            (Some(z), Some(x), Some(y)) => {
                update_expr.push_str(
                    ", z = if_not_exists(z, :z), x = if_not_exists(x, :x), y = if_not_exists(y, :y)",
                );
                request = request
                    .expression_attribute_values(":z", n(z))
                    .expression_attribute_values(":x", n(x))
                    .expression_attribute_values(":y", n(y));

                if let Some(region) = &message.region {
                    update_expr.push_str(", #region = if_not_exists(#region, :region)");
                    request = request
                        .expression_attribute_names("#region", "region")
                        .expression_attribute_values(":region", s(region));
                }
            }
            _ => {
                let lat = message.lat.expect("validated google message has lat");
                let lon = message.lon.expect("validated google message has lon");
                let zoom = message.effective_zoom();
                update_expr.push_str(
                    ", lat = if_not_exists(lat, :lat), lon = if_not_exists(lon, :lon), \
                     zoom = if_not_exists(zoom, :zoom)",
                );
                request = request
                    .expression_attribute_values(":lat", n(lat))
                    .expression_attribute_values(":lon", n(lon))
                    .expression_attribute_values(":zoom", n(zoom));
            }
        }

        let condition_expr = "attribute_not_exists(#status) OR \
             #status IN (:pending, :failed) OR \
             (#status = :processing AND (attribute_not_exists(lock_until_epoch) OR lock_until_epoch < :now))";

        let result = request
            .update_expression(update_expr)
            .condition_expression(condition_expr)
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => {
                let attrs = output.attributes.unwrap_or_default();
                let attempt = get_n_u64(&attrs, "attempts").unwrap_or(1);
                let checkpoint = match (get_s(&attrs, "s3_bucket"), get_s(&attrs, "s3_key")) {
                    (Some(bucket), Some(key)) => Some(S3Checkpoint { bucket, key }),
                    _ => None,
                };
                info!(tile_id = %tile_id, attempt, "tile claimed");
                Ok(ClaimOutcome::claimed(tile_id, attempt, now_epoch, checkpoint))
            }
            Err(err) if is_conditional_check_failed(&err) => {
                let status = self.current_status(&message.run_id, &tile_id).await;
                if status == Some(JobStatus::Completed) {
                    Ok(ClaimOutcome::already_completed(tile_id))
                } else {
                    warn!(tile_id = %tile_id, "claim lost to another worker");
                    Ok(ClaimOutcome::locked_by_other(tile_id))
                }
            }
            Err(err) => Err(DbError::Query(err.to_string())),
        }
    }

    /// Unconditional write of the S3 location, run after a successful
    /// upload and before the vision-model call.
    #[instrument(skip(self))]
    pub async fn checkpoint_s3(
        &self,
        run_id: &str,
        tile_id: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), DbError> {
        self.client
            .inner()
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(job_key(run_id, tile_id)))
            .update_expression("SET s3_bucket = :bucket, s3_key = :key")
            .expression_attribute_values(":bucket", s(bucket))
            .expression_attribute_values(":key", s(key))
            .send()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    /// Terminal success write. Unconditional: once the worker reaches
    /// this point the outcome is installed regardless of lease validity.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, openai_usage))]
    pub async fn complete_job(
        &self,
        run_id: &str,
        tile_id: &str,
        s3_bucket: &str,
        s3_key: &str,
        status_ai: Option<&str>,
        reasoning: Option<&str>,
        openai_usage: Option<&Value>,
        claimed_at_epoch: Option<i64>,
        finished_at_epoch: i64,
    ) -> Result<(), DbError> {
        let mut update_expr = String::from(
            "SET #status = :status, finished_at_epoch = :finished, s3_bucket = :bucket, s3_key = :key",
        );

        let mut request = self
            .client
            .inner()
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(job_key(run_id, tile_id)))
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", s(JobStatus::Completed.as_str()))
            .expression_attribute_values(":finished", n(finished_at_epoch))
            .expression_attribute_values(":bucket", s(s3_bucket))
            .expression_attribute_values(":key", s(s3_key));

        if let Some(status_ai) = status_ai {
            update_expr.push_str(", status_ai = :status_ai");
            request = request.expression_attribute_values(":status_ai", s(status_ai));
        }
        if let Some(reasoning) = reasoning {
            update_expr.push_str(", reasoning = :reasoning");
            request = request.expression_attribute_values(":reasoning", s(reasoning));
        }
        if let Some(usage) = openai_usage {
            update_expr.push_str(", openai_usage = :usage");
            request = request.expression_attribute_values(":usage", json_to_av(usage));
        }
        if let Some(claimed_at) = claimed_at_epoch {
            let duration_ms = (finished_at_epoch - claimed_at) * 1000;
            update_expr.push_str(", duration_ms = :duration_ms");
            request = request.expression_attribute_values(":duration_ms", n(duration_ms));
        }

        request
            .update_expression(update_expr)
            .send()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        info!(tile_id, "tile completed");
        Ok(())
    }

    /// Terminal failure write. `error_message` is truncated to 500 bytes
    /// before being persisted.
    #[instrument(skip(self, error_message))]
    pub async fn fail_job(
        &self,
        run_id: &str,
        tile_id: &str,
        error_code: &str,
        error_message: &str,
        finished_at_epoch: i64,
    ) -> Result<(), DbError> {
        let truncated = truncate_error_message(error_message);

        self.client
            .inner()
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(job_key(run_id, tile_id)))
            .update_expression(
                "SET #status = :status, finished_at_epoch = :finished, \
                 error_code = :code, error_message = :message",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", s(JobStatus::Failed.as_str()))
            .expression_attribute_values(":finished", n(finished_at_epoch))
            .expression_attribute_values(":code", s(error_code))
            .expression_attribute_values(":message", s(truncated))
            .send()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        warn!(tile_id, error_code, "tile failed");
        Ok(())
    }
}

fn is_conditional_check_failed<R>(
    err: &aws_sdk_dynamodb::error::SdkError<aws_sdk_dynamodb::operation::update_item::UpdateItemError, R>,
) -> bool {
    err.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_error_messages() {
        let long = "x".repeat(600);
        assert_eq!(truncate_error_message(&long).len(), ERROR_MESSAGE_MAX_BYTES);
    }

    #[test]
    fn leaves_short_messages_untouched() {
        assert_eq!(truncate_error_message("boom"), "boom");
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let message = "é".repeat(400);
        let truncated = truncate_error_message(&message);
        assert!(truncated.len() <= ERROR_MESSAGE_MAX_BYTES);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
