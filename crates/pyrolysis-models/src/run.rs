//! The `Run` record: one manifest's lifecycle, aggregated across all of
//! its `TileJob` children.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "CREATED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunItem {
    pub run_id: String,
    pub status: RunStatus,
    pub total_tiles: u64,
    pub completed_tiles: u64,
    pub failed_tiles: u64,
    pub source_bucket: String,
    pub source_key: String,
    pub created_at_epoch: i64,
    pub finished_at_epoch: Option<i64>,
}

impl RunItem {
    /// A run is complete once its total has been finalized by the ingest
    /// driver and every counted tile has reached a terminal state. Because
    /// `total_tiles` starts at zero and is only set after the last batch
    /// is sent, a worker can finish tiles before the total is known; the
    /// `total_tiles > 0` guard prevents treating that transient state as
    /// completion.
    pub fn is_complete(&self) -> bool {
        self.total_tiles > 0 && self.completed_tiles + self.failed_tiles >= self.total_tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(total: u64, completed: u64, failed: u64) -> RunItem {
        RunItem {
            run_id: "run_x".into(),
            status: RunStatus::Running,
            total_tiles: total,
            completed_tiles: completed,
            failed_tiles: failed,
            source_bucket: "b".into(),
            source_key: "k".into(),
            created_at_epoch: 0,
            finished_at_epoch: None,
        }
    }

    #[test]
    fn zero_total_is_never_complete() {
        assert!(!run(0, 0, 0).is_complete());
    }

    #[test]
    fn complete_once_counters_reach_total() {
        assert!(run(3, 2, 1).is_complete());
        assert!(!run(3, 1, 1).is_complete());
    }
}
