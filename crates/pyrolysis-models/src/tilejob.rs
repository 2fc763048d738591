//! The `TileJob` record and the shapes returned by the claim protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ImagerySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "PROCESSING" => Some(JobStatus::Processing),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// S3 location recorded once imagery has been durably uploaded. Its
/// presence on a claimed job means the upstream fetch can be skipped on
/// retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Checkpoint {
    pub bucket: String,
    pub key: String,
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    AlreadyCompleted,
    LockedByOther,
}

/// Full result of [`crate`]-level claim semantics, returned by the store.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub result: ClaimResult,
    pub tile_id: String,
    pub attempt: Option<u64>,
    pub claimed_at_epoch: Option<i64>,
    pub checkpoint: Option<S3Checkpoint>,
}

impl ClaimOutcome {
    pub fn claimed(tile_id: String, attempt: u64, claimed_at_epoch: i64, checkpoint: Option<S3Checkpoint>) -> Self {
        Self {
            result: ClaimResult::Claimed,
            tile_id,
            attempt: Some(attempt),
            claimed_at_epoch: Some(claimed_at_epoch),
            checkpoint,
        }
    }

    pub fn already_completed(tile_id: String) -> Self {
        Self {
            result: ClaimResult::AlreadyCompleted,
            tile_id,
            attempt: None,
            claimed_at_epoch: None,
            checkpoint: None,
        }
    }

    pub fn locked_by_other(tile_id: String) -> Self {
        Self {
            result: ClaimResult::LockedByOther,
            tile_id,
            attempt: None,
            claimed_at_epoch: None,
            checkpoint: None,
        }
    }
}

/// A fully hydrated `TileJobs` item, as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileJobItem {
    pub run_id: String,
    pub tile_id: String,
    pub status: JobStatus,
    pub attempts: u64,
    pub lock_until_epoch: Option<i64>,
    pub started_at_epoch: Option<i64>,
    pub last_claimed_at_epoch: Option<i64>,
    pub finished_at_epoch: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,

    pub imagery_source: ImagerySource,
    pub z: Option<u32>,
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub region: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub zoom: Option<u32>,

    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
    pub status_ai: Option<String>,
    pub reasoning: Option<String>,
    pub openai_usage: Option<Value>,
    pub duration_ms: Option<i64>,
}
