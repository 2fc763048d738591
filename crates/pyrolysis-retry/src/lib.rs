//! The Retry/Deadline Engine, plus the upstream imagery fetchers and
//! secret cache built on top of it.

pub mod engine;
pub mod fetchers;
pub mod secrets;

pub use engine::{execute_with_retry, RetryError, RetryPolicy, DEFAULT_RETRYABLE_STATUSES};
pub use fetchers::{fetch_google_tile, fetch_mapbox_tile, FetchError};
pub use secrets::{SecretCache, SecretError};
