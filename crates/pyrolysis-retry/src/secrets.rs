//! A per-process cache over a single Secrets Manager JSON blob
//! (`PIPELINE_SECRETS_ID`), shared by the Mapbox and Google fetchers. The
//! original Lambda implementation relied on warm-environment recycling to
//! bound staleness; since `tile-worker` is a long-lived process, this
//! cache enforces an explicit TTL and re-fetches on expiry instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument};

pub const SECRET_CACHE_TTL_SECONDS: u64 = 900;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secrets manager fetch failed: {0}")]
    Fetch(String),
    #[error("secret {secret_id} is missing key {key}")]
    MissingKey { secret_id: String, key: String },
    #[error("secret {0} payload is not valid JSON")]
    NotJson(String),
}

struct CachedSecret {
    value: Value,
    fetched_at: Instant,
}

/// Caches the decoded JSON body of one Secrets Manager secret.
pub struct SecretCache {
    client: aws_sdk_secretsmanager::Client,
    secret_id: String,
    ttl: Duration,
    cached: Arc<RwLock<Option<CachedSecret>>>,
}

impl SecretCache {
    pub async fn connect(region: &str, secret_id: impl Into<String>) -> Self {
        let region_provider = aws_config::Region::new(region.to_string());
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        Self {
            client: aws_sdk_secretsmanager::Client::new(&shared_config),
            secret_id: secret_id.into(),
            ttl: Duration::from_secs(SECRET_CACHE_TTL_SECONDS),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    #[cfg(test)]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the string value of `key` within the cached secret JSON,
    /// re-fetching from Secrets Manager if the cache is empty or expired.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<String, SecretError> {
        let value = self.get_json().await?;
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SecretError::MissingKey { secret_id: self.secret_id.clone(), key: key.to_string() })
    }

    async fn get_json(&self) -> Result<Value, SecretError> {
        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        let mut guard = self.cached.write().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }

        let response = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|e| SecretError::Fetch(e.to_string()))?;

        let raw = response
            .secret_string()
            .ok_or_else(|| SecretError::Fetch("secret has no string payload".into()))?;

        let value: Value = serde_json::from_str(raw)
            .map_err(|_| SecretError::NotJson(self.secret_id.clone()))?;

        info!(secret_id = %self.secret_id, "secret refreshed");
        *guard = Some(CachedSecret { value: value.clone(), fetched_at: Instant::now() });
        Ok(value)
    }
}
