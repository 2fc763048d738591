//! Wiring layer: configuration, structured logging, the S3 object store,
//! the vision client, and the processor that strings them together with
//! [`pyrolysis_store`] and [`pyrolysis_retry`].

pub mod config;
pub mod logging;
pub mod object_store;
pub mod processor;
pub mod vision;

pub use config::{BaseDirectives, IngestionConfig, WorkerConfig};
pub use logging::{init_logging, timed_stage};
pub use object_store::{google_coord_key, mapbox_tile_key, s3_url, ObjectStore, ObjectStoreError};
pub use processor::{ProcessError, ProcessOutcome, Processor, MIN_REMAINING_MS_FOR_VISION};
pub use vision::{VisionAnalysis, VisionClient, VisionError, VisionVerdict};
