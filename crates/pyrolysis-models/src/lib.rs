//! Domain model for the tile pipeline: message shapes, canonical identity,
//! run/job records and the closed error taxonomy. Nothing in this crate
//! talks to a network or a clock beyond what callers pass in explicitly.

pub mod errors;
pub mod identity;
pub mod message;
pub mod run;
pub mod tilejob;

pub use errors::{error_code_from_http_status, timeout_error_code, ErrorCode, Provider};
pub use identity::{canonical_tile_id, DEFAULT_GOOGLE_ZOOM};
pub use message::{ImagerySource, MessageError, SourceRef, TileJobMessage};
pub use run::{RunItem, RunStatus};
pub use tilejob::{ClaimOutcome, ClaimResult, JobStatus, S3Checkpoint, TileJobItem};
