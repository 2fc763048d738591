//! The State Store Adapter: typed, conditional operations over DynamoDB's
//! `Runs` and `TileJobs` tables.

pub mod av;
pub mod client;
pub mod errors;
pub mod repositories;

pub use client::DynamoStoreClient;
pub use errors::DbError;
pub use repositories::{RunsRepository, TileJobsRepository};
