//! `Runs` table operations. All writes route `status` through
//! `ExpressionAttributeNames` since it is a DynamoDB reserved word.

use tracing::{info, instrument, warn};

use pyrolysis_models::RunStatus;

use crate::av::{n, s};
use crate::client::DynamoStoreClient;
use crate::errors::DbError;

#[derive(Clone)]
pub struct RunsRepository {
    client: DynamoStoreClient,
    table_name: String,
}

impl RunsRepository {
    pub fn new(client: DynamoStoreClient, table_name: impl Into<String>) -> Self {
        Self { client, table_name: table_name.into() }
    }

    /// Creates a `Run` row conditional on `run_id` not already existing.
    /// Fails with [`DbError::RunAlreadyExists`] on a conditional check
    /// failure; any other error propagates as [`DbError::Query`].
    #[instrument(skip(self))]
    pub async fn create_run(
        &self,
        run_id: &str,
        source_bucket: &str,
        source_key: &str,
        total_tiles: u64,
        now_epoch: i64,
    ) -> Result<(), DbError> {
        let result = self
            .client
            .inner()
            .put_item()
            .table_name(&self.table_name)
            .item("run_id", s(run_id))
            .item("status", s(RunStatus::Running.as_str()))
            .item("total_tiles", n(total_tiles))
            .item("completed_tiles", n(0))
            .item("failed_tiles", n(0))
            .item("source_bucket", s(source_bucket))
            .item("source_key", s(source_key))
            .item("created_at_epoch", n(now_epoch))
            .condition_expression("attribute_not_exists(run_id)")
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(run_id, "run created");
                Ok(())
            }
            Err(err) => {
                if is_conditional_check_failed(&err) {
                    Err(DbError::RunAlreadyExists)
                } else {
                    Err(DbError::Query(err.to_string()))
                }
            }
        }
    }

    /// Idempotent wrapper: returns `true` if the run was created, `false`
    /// if it already existed, and only propagates genuinely unexpected
    /// errors.
    pub async fn try_create_run(
        &self,
        run_id: &str,
        source_bucket: &str,
        source_key: &str,
        total_tiles: u64,
        now_epoch: i64,
    ) -> Result<bool, DbError> {
        match self.create_run(run_id, source_bucket, source_key, total_tiles, now_epoch).await {
            Ok(()) => Ok(true),
            Err(DbError::RunAlreadyExists) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Unconditional atomic increment of the two counters. A call with
    /// both deltas zero is a no-op and never reaches the network.
    #[instrument(skip(self))]
    pub async fn update_run_counters(
        &self,
        run_id: &str,
        completed_delta: i64,
        failed_delta: i64,
    ) -> Result<(), DbError> {
        if completed_delta == 0 && failed_delta == 0 {
            return Ok(());
        }

        self.client
            .inner()
            .update_item()
            .table_name(&self.table_name)
            .key("run_id", s(run_id))
            .update_expression("ADD completed_tiles :c, failed_tiles :f")
            .expression_attribute_values(":c", n(completed_delta))
            .expression_attribute_values(":f", n(failed_delta))
            .send()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_total_tiles(&self, run_id: &str, total_tiles: u64) -> Result<(), DbError> {
        self.client
            .inner()
            .update_item()
            .table_name(&self.table_name)
            .key("run_id", s(run_id))
            .update_expression("SET total_tiles = :total")
            .expression_attribute_values(":total", n(total_tiles))
            .send()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        finished_at_epoch: Option<i64>,
    ) -> Result<(), DbError> {
        let mut update_expr = "SET #status = :status".to_string();
        let mut request = self
            .client
            .inner()
            .update_item()
            .table_name(&self.table_name)
            .key("run_id", s(run_id))
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", s(status.as_str()));

        if let Some(finished) = finished_at_epoch {
            update_expr.push_str(", finished_at_epoch = :finished");
            request = request.expression_attribute_values(":finished", n(finished));
        }

        request
            .update_expression(update_expr)
            .send()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        warn!(run_id, status = status.as_str(), "run status transitioned");
        Ok(())
    }
}

fn is_conditional_check_failed<R>(
    err: &aws_sdk_dynamodb::error::SdkError<aws_sdk_dynamodb::operation::put_item::PutItemError, R>,
) -> bool {
    err.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false)
}
