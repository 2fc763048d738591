//! Error catalog for the state store adapter.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("DATABASE_UPLINK_FAULT: {0}")]
    Connection(String),

    #[error("CONFIGURATION_FAULT: {0}")]
    Configuration(String),

    #[error("DYNAMODB_QUERY_FAULT: {0}")]
    Query(String),

    #[error("DATA_MAPPING_FAULT: {0}")]
    Mapping(String),

    #[error("RUN_ALREADY_EXISTS")]
    RunAlreadyExists,

    #[error("RUN_NOT_FOUND")]
    RunNotFound,

    #[error("TILEJOB_NOT_FOUND")]
    TileJobNotFound,
}

impl<E, R> From<aws_sdk_dynamodb::error::SdkError<E, R>> for DbError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(err: aws_sdk_dynamodb::error::SdkError<E, R>) -> Self {
        DbError::Query(err.to_string())
    }
}
