//! Long-running worker: drains `tile_jobs_queue_url` one message at a
//! time (SQS `MaxNumberOfMessages(1)`, matching the original Lambda's
//! `batch_size = 1`), processes it to a terminal write, and deletes the
//! message. A deadline is computed per message from the claim lock
//! budget so a stuck fetch or vision call never outlives the lock it
//! took out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_sdk_sqs::Client as SqsClient;
use clap::Parser;
use pyrolysis_core::{init_logging, ObjectStore, ProcessOutcome, Processor, VisionClient, WorkerConfig};
use pyrolysis_models::TileJobMessage;
use pyrolysis_retry::SecretCache;
use pyrolysis_store::{DynamoStoreClient, RunsRepository, TileJobsRepository};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::parse();
    init_logging(&config.log_level);

    info!(queue = %config.tile_jobs_queue_url, "tile-worker starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested, finishing in-flight message then exiting");
            shutdown_signal.store(true, Ordering::SeqCst);
        }
    });

    let ddb = DynamoStoreClient::connect(&config.aws_region)
        .await
        .context("failed to connect to DynamoDB")?;
    let runs = RunsRepository::new(ddb.clone(), config.runs_table.clone());
    let tile_jobs = TileJobsRepository::new(ddb, config.tilejobs_table.clone());
    let object_store = ObjectStore::connect(&config.aws_region).await;
    let secrets = SecretCache::connect(&config.aws_region, &config.secrets_id).await;
    let http = reqwest::Client::new();

    let region_provider = aws_config::Region::new(config.aws_region.clone());
    let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    let sqs = SqsClient::new(&shared_config);

    let vision_api_key = secrets
        .get("OPENAI_API_KEY")
        .await
        .context("failed to resolve vision API key")?;

    let processor = Processor {
        runs,
        tile_jobs,
        object_store,
        vision: VisionClient::new(http.clone(), vision_api_key),
        secrets,
        http,
        bucket: config.s3_bucket.clone(),
        max_retries: config.max_retries,
        backoff_base_secs: 0.5,
        lock_seconds: config.job_stale_lock_seconds,
        request_timeout: Duration::from_secs_f64(config.request_timeout_secs),
    };

    while !shutdown.load(Ordering::SeqCst) {
        let received = sqs
            .receive_message()
            .queue_url(&config.tile_jobs_queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(20)
            .send()
            .await;

        let messages = match received {
            Ok(output) => output.messages.unwrap_or_default(),
            Err(err) => {
                error!(error = %err, "failed to receive from queue, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for sqs_message in messages {
            let Some(body) = sqs_message.body.as_deref() else {
                warn!("received message with no body, discarding");
                delete_message(&sqs, &config.tile_jobs_queue_url, &sqs_message).await;
                continue;
            };

            let message = match TileJobMessage::parse(body) {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "poison message, acknowledging without processing");
                    delete_message(&sqs, &config.tile_jobs_queue_url, &sqs_message).await;
                    continue;
                }
            };

            let deadline_epoch = chrono::Utc::now().timestamp() + config.job_stale_lock_seconds;

            match processor.process(&message, deadline_epoch).await {
                Ok(outcome @ ProcessOutcome::LockedByOther) => {
                    info!(tile_id = %message.tile_id(), outcome = ?outcome, "locked by another worker, leaving for redelivery");
                }
                Ok(outcome) => {
                    info!(tile_id = %message.tile_id(), outcome = ?outcome, "message processed");
                    delete_message(&sqs, &config.tile_jobs_queue_url, &sqs_message).await;
                }
                Err(err) => {
                    error!(error = %err, tile_id = %message.tile_id(), "processing failed, leaving for redelivery");
                }
            }
        }
    }

    info!("tile-worker shut down cleanly");
    Ok(())
}

async fn delete_message(sqs: &SqsClient, queue_url: &str, message: &aws_sdk_sqs::types::Message) {
    let Some(receipt_handle) = message.receipt_handle.as_deref() else { return };
    if let Err(err) = sqs
        .delete_message()
        .queue_url(queue_url)
        .receipt_handle(receipt_handle)
        .send()
        .await
    {
        error!(error = %err, "failed to delete processed message");
    }
}
