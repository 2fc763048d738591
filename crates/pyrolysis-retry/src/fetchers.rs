//! Mapbox and Google Static Maps tile fetchers, built on [`engine`] and
//! [`secrets::SecretCache`]. Both attach the last HTTP status they saw to
//! their error (mirroring the original `ImageryFetchError`), so the
//! processor can classify failures with
//! [`pyrolysis_models::error_code_from_http_status`] regardless of
//! whether the failure was an immediate non-retryable status or a
//! retry-exhausted one.

use pyrolysis_models::Provider;
use reqwest::Client;
use thiserror::Error;

use crate::engine::{execute_with_retry, RetryError, RetryPolicy, DEFAULT_RETRYABLE_STATUSES};
use crate::secrets::{SecretCache, SecretError};

const MAPBOX_TILESET: &str = "mapbox.satellite";
const GOOGLE_BASE_URL: &str = "https://maps.googleapis.com/maps/api/staticmap";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{provider:?} fetch failed with status {status}")]
    Http { provider: Provider, status: u16 },
    #[error("{provider:?} fetch failed without a status (network/timeout)")]
    NoStatus { provider: Provider },
    #[error("deadline exceeded during {provider:?} fetch")]
    Deadline { provider: Provider },
    #[error("secret lookup failed: {0}")]
    Secret(#[from] SecretError),
}

impl FetchError {
    /// The HTTP status attached to this failure, if any — used directly
    /// by the processor's error classifier.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            FetchError::Http { provider, .. }
            | FetchError::NoStatus { provider }
            | FetchError::Deadline { provider } => Some(*provider),
            FetchError::Secret(_) => None,
        }
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, FetchError::Deadline { .. })
    }
}

fn to_fetch_error(provider: Provider, err: RetryError) -> FetchError {
    match err {
        RetryError::DeadlineExceeded { .. } => FetchError::Deadline { provider },
        RetryError::RetryExhausted { last_status: Some(status), .. } => {
            FetchError::Http { provider, status }
        }
        RetryError::RetryExhausted { last_status: None, .. } => FetchError::NoStatus { provider },
        RetryError::Transport(_) => FetchError::NoStatus { provider },
    }
}

fn mapbox_url(z: u32, x: u32, y: u32, token: &str) -> String {
    format!("https://api.mapbox.com/v4/{MAPBOX_TILESET}/{z}/{x}/{y}.jpg?access_token={token}")
}

fn google_url(lat: f64, lon: f64, zoom: u32, api_key: &str) -> String {
    format!(
        "{GOOGLE_BASE_URL}?center={lat},{lon}&zoom={zoom}&size=640x640&scale=2&maptype=satellite&key={api_key}"
    )
}

/// Fetches one Mapbox satellite tile as raw image bytes.
pub async fn fetch_mapbox_tile(
    http: &Client,
    secrets: &SecretCache,
    z: u32,
    x: u32,
    y: u32,
    policy: RetryPolicy,
    timeout: std::time::Duration,
) -> Result<Vec<u8>, FetchError> {
    let token = secrets.get("MAPBOX_TOKEN").await?;
    let url = mapbox_url(z, x, y, &token);

    let response = execute_with_retry(policy, &DEFAULT_RETRYABLE_STATUSES, |_attempt| {
        http.get(&url).timeout(timeout).send()
    })
    .await
    .map_err(|e| to_fetch_error(Provider::Mapbox, e))?;

    if !response.status().is_success() {
        return Err(FetchError::Http { provider: Provider::Mapbox, status: response.status().as_u16() });
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|_| FetchError::NoStatus { provider: Provider::Mapbox })
}

/// Fetches one Google Static Maps image for a coordinate.
pub async fn fetch_google_tile(
    http: &Client,
    secrets: &SecretCache,
    lat: f64,
    lon: f64,
    zoom: u32,
    policy: RetryPolicy,
    timeout: std::time::Duration,
) -> Result<Vec<u8>, FetchError> {
    let api_key = secrets.get("GOOGLE_API_KEY").await?;
    let url = google_url(lat, lon, zoom, &api_key);

    let response = execute_with_retry(policy, &DEFAULT_RETRYABLE_STATUSES, |_attempt| {
        http.get(&url).timeout(timeout).send()
    })
    .await
    .map_err(|e| to_fetch_error(Provider::Google, e))?;

    if !response.status().is_success() {
        return Err(FetchError::Http { provider: Provider::Google, status: response.status().as_u16() });
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|_| FetchError::NoStatus { provider: Provider::Google })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapbox_url_includes_coordinates_and_token() {
        let url = mapbox_url(14, 8716, 5378, "tok");
        assert!(url.contains("/14/8716/5378.jpg"));
        assert!(url.contains("access_token=tok"));
    }

    #[test]
    fn google_url_includes_center_and_zoom() {
        let url = google_url(12.345678, -7.654321, 18, "key");
        assert!(url.contains("center=12.345678,-7.654321"));
        assert!(url.contains("zoom=18"));
    }

    #[test]
    fn retry_exhausted_with_status_becomes_http_error() {
        let err = to_fetch_error(
            Provider::Mapbox,
            RetryError::RetryExhausted { attempts: 3, last_status: Some(503) },
        );
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn retry_exhausted_without_status_becomes_no_status_error() {
        let err = to_fetch_error(
            Provider::Google,
            RetryError::RetryExhausted { attempts: 3, last_status: None },
        );
        assert!(matches!(err, FetchError::NoStatus { .. }));
    }
}
