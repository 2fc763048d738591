//! Environment-driven configuration. Each binary gets its own directive
//! struct layered on a shared base, parsed with `clap` so the same code
//! works from a real CLI invocation and from an environment-only runtime:
//! a required field with no value fails `clap`'s own parse step, giving
//! "missing required value ⇒ immediate startup failure" for free.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct BaseDirectives {
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,

    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: String,

    #[arg(long, env = "DDB_RUNS_TABLE")]
    pub runs_table: String,

    #[arg(long, env = "DDB_TILEJOBS_TABLE")]
    pub tilejobs_table: String,

    #[arg(long, env = "PIPELINE_SECRETS_ID")]
    pub secrets_id: String,

    #[arg(long, env = "JOB_STALE_LOCK_SECONDS", default_value_t = 900)]
    pub job_stale_lock_seconds: i64,

    #[arg(long, env = "PIPELINE_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "PIPELINE_REQUEST_TIMEOUT", default_value_t = 10.0)]
    pub request_timeout_secs: f64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Configuration for `apps/tile-worker`.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-worker", version, about = "Drains the tile job queue, one message at a time")]
pub struct WorkerConfig {
    #[command(flatten)]
    pub base: BaseDirectives,

    #[arg(long, env = "TILE_JOBS_QUEUE_URL")]
    pub tile_jobs_queue_url: String,
}

/// Configuration for `apps/tile-ingest`.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-ingest", version, about = "Turns a CSV manifest into a run plus queued tile jobs")]
pub struct IngestionConfig {
    #[command(flatten)]
    pub base: BaseDirectives,

    #[arg(long, env = "TILE_JOBS_QUEUE_URL")]
    pub tile_jobs_queue_url: String,
}

impl std::ops::Deref for WorkerConfig {
    type Target = BaseDirectives;
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl std::ops::Deref for IngestionConfig {
    type Target = BaseDirectives;
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}
