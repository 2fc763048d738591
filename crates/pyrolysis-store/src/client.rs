//! Singleton DynamoDB client. Built once per process and cloned (cheaply,
//! `aws_sdk_dynamodb::Client` is an `Arc` internally) into each repository.

use aws_sdk_dynamodb::Client;
use tracing::{info, instrument};

use crate::errors::DbError;

#[derive(Clone)]
pub struct DynamoStoreClient {
    inner: Client,
}

impl DynamoStoreClient {
    /// Resolves credentials and endpoint through the ambient AWS config
    /// chain (environment, profile, IMDS) for `region`.
    #[instrument]
    pub async fn connect(region: &str) -> Result<Self, DbError> {
        if region.is_empty() {
            return Err(DbError::Configuration("AWS_REGION must not be empty".into()));
        }

        let region_provider = aws_config::Region::new(region.to_string());
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        info!(region, "dynamodb client configured");

        Ok(Self {
            inner: Client::new(&shared_config),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}
