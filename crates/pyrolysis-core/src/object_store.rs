//! Deterministic S3 key derivation plus the upload/download calls the
//! processor needs around it. Keys are recomputed from the same numeric
//! fields [`pyrolysis_models::identity`] uses for tile identity, so a
//! checkpoint written by one attempt is found unchanged by the next.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use thiserror::Error;
use tracing::instrument;

const COORD_PRECISION: usize = 6;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("failed to put object {key} in bucket {bucket}: {source}")]
    Put {
        bucket: String,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to get object {key} from bucket {bucket}: {source}")]
    Get {
        bucket: String,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Deterministic key for a Mapbox tile image, namespaced under its run so
/// two runs fetching the same coordinate never collide on one object.
pub fn mapbox_tile_key(run_id: &str, z: u32, x: u32, y: u32) -> String {
    format!("runs/{run_id}/tiles/z={z}/x={x}/y={y}.jpg")
}

/// Deterministic key for a Google static-map image, namespaced under its run.
pub fn google_coord_key(run_id: &str, lat: f64, lon: f64, zoom: u32) -> String {
    format!(
        "runs/{run_id}/coords/lat={lat:.prec$}/lon={lon:.prec$}/z={zoom}.png",
        prec = COORD_PRECISION
    )
}

pub fn s3_url(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
}

impl ObjectStore {
    pub async fn connect(region: &str) -> Self {
        let region_provider = aws_config::Region::new(region.to_string());
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        Self { client: Client::new(&shared_config) }
    }

    #[instrument(skip(self, bytes))]
    pub async fn upload_tile_image(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn download_image(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Get {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        let data = output.body.collect().await.map_err(|e| ObjectStoreError::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: Box::new(e),
        })?;

        Ok(data.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapbox_key_is_namespaced_by_run_and_coordinate() {
        assert_eq!(
            mapbox_tile_key("run_abc123456789", 14, 8716, 5378),
            "runs/run_abc123456789/tiles/z=14/x=8716/y=5378.jpg"
        );
    }

    #[test]
    fn google_key_rounds_coordinates_and_is_namespaced_by_run() {
        assert_eq!(
            google_coord_key("run_abc123456789", 12.345678, -7.654321, 18),
            "runs/run_abc123456789/coords/lat=12.345678/lon=-7.654321/z=18.png"
        );
    }

    #[test]
    fn s3_url_formats_as_uri() {
        assert_eq!(s3_url("bucket", "key/path.jpg"), "s3://bucket/key/path.jpg");
    }
}
