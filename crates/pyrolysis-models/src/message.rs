//! The transient queue message shape and its validation. A message that
//! fails [`TileJobMessage::parse`] is poison: the caller acknowledges it
//! without ever creating a `TileJob` row.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{canonical_tile_id, DEFAULT_GOOGLE_ZOOM};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagerySource {
    Mapbox,
    Google,
}

impl ImagerySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImagerySource::Mapbox => "mapbox",
            ImagerySource::Google => "google",
        }
    }
}

/// Raw, not-yet-validated wire shape. Deserializing this never fails on
/// missing source-specific fields; that check happens in
/// [`TileJobMessage::parse`] so a malformed payload is reported as
/// `SCHEMA_INVALID` rather than a generic deserialization error.
#[derive(Debug, Clone, Deserialize)]
struct RawTileJobMessage {
    run_id: String,
    imagery_source: ImagerySource,
    source: SourceRef,
    #[serde(default)]
    z: Option<i64>,
    #[serde(default)]
    x: Option<i64>,
    #[serde(default)]
    y: Option<i64>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    zoom: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TileJobMessage {
    pub run_id: String,
    pub imagery_source: ImagerySource,
    pub source: SourceRef,
    pub z: Option<u32>,
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub region: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub zoom: Option<u32>,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("MESSAGE_PARSE_ERROR: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("SCHEMA_INVALID: {0}")]
    SchemaInvalid(String),
}

impl TileJobMessage {
    /// Parses and fully validates an SQS message body. Returns
    /// [`MessageError::Parse`] for malformed JSON and
    /// [`MessageError::SchemaInvalid`] for JSON that is well-formed but
    /// violates the shape constraints for its declared `imagery_source`.
    /// Both variants are poison: callers must acknowledge, not retry.
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        let raw: RawTileJobMessage = serde_json::from_str(body)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawTileJobMessage) -> Result<Self, MessageError> {
        let invalid = |msg: &str| MessageError::SchemaInvalid(msg.to_string());

        match raw.imagery_source {
            ImagerySource::Mapbox => {
                let z = raw.z.ok_or_else(|| invalid("mapbox messages require z"))?;
                let x = raw.x.ok_or_else(|| invalid("mapbox messages require x"))?;
                let y = raw.y.ok_or_else(|| invalid("mapbox messages require y"))?;
                if !(0..=22).contains(&z) {
                    return Err(invalid("z must be in [0, 22]"));
                }
                if x < 0 || y < 0 {
                    return Err(invalid("x and y must be non-negative"));
                }
                if let Some(region) = &raw.region {
                    if region.is_empty() {
                        return Err(invalid("region must be non-empty when present"));
                    }
                }
                Ok(TileJobMessage {
                    run_id: raw.run_id,
                    imagery_source: raw.imagery_source,
                    source: raw.source,
                    z: Some(z as u32),
                    x: Some(x as u32),
                    y: Some(y as u32),
                    region: raw.region,
                    lat: None,
                    lon: None,
                    zoom: None,
                })
            }
            ImagerySource::Google => {
                let lat = raw.lat.ok_or_else(|| invalid("google messages require lat"))?;
                let lon = raw.lon.ok_or_else(|| invalid("google messages require lon"))?;
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(invalid("lat must be in [-90, 90]"));
                }
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(invalid("lon must be in [-180, 180]"));
                }
                let zoom = match raw.zoom {
                    Some(z) if (0..=22).contains(&z) => Some(z as u32),
                    Some(_) => return Err(invalid("zoom must be in [0, 22]")),
                    None => None,
                };
                Ok(TileJobMessage {
                    run_id: raw.run_id,
                    imagery_source: raw.imagery_source,
                    source: raw.source,
                    z: None,
                    x: None,
                    y: None,
                    region: None,
                    lat: Some(lat),
                    lon: Some(lon),
                    zoom,
                })
            }
        }
    }

    /// Effective zoom, defaulting for Google messages that omitted one.
    pub fn effective_zoom(&self) -> u32 {
        self.zoom.unwrap_or(DEFAULT_GOOGLE_ZOOM)
    }

    /// Canonical identity, recomputed from the validated numeric fields —
    /// never trusted from the wire.
    pub fn tile_id(&self) -> String {
        canonical_tile_id(
            self.imagery_source.as_str(),
            self.z,
            self.x,
            self.y,
            self.lat,
            self.lon,
            self.zoom,
        )
        .expect("validated message always has a computable tile_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_mapbox_message() {
        let body = r#"{"run_id":"run_x","imagery_source":"mapbox","z":14,"x":8716,"y":5378,
            "source":{"bucket":"b","key":"k"}}"#;
        let msg = TileJobMessage::parse(body).unwrap();
        assert_eq!(msg.tile_id(), "14/8716/5378");
    }

    #[test]
    fn parses_valid_google_message_with_default_zoom() {
        let body = r#"{"run_id":"run_x","imagery_source":"google","lat":12.345678,"lon":-7.654321,
            "source":{"bucket":"b","key":"k"}}"#;
        let msg = TileJobMessage::parse(body).unwrap();
        assert_eq!(msg.effective_zoom(), 18);
        assert_eq!(msg.tile_id(), "coord:12.345678,-7.654321,18");
    }

    #[test]
    fn rejects_mapbox_message_missing_coordinates() {
        let body = r#"{"run_id":"run_x","imagery_source":"mapbox","z":14,
            "source":{"bucket":"b","key":"k"}}"#;
        assert!(matches!(TileJobMessage::parse(body), Err(MessageError::SchemaInvalid(_))));
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        let body = r#"{"run_id":"run_x","imagery_source":"google","lat":95.0,"lon":0.0,
            "source":{"bucket":"b","key":"k"}}"#;
        assert!(matches!(TileJobMessage::parse(body), Err(MessageError::SchemaInvalid(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(TileJobMessage::parse("not json"), Err(MessageError::Parse(_))));
    }

    #[test]
    fn unknown_extra_fields_are_ignored() {
        let body = r#"{"run_id":"run_x","imagery_source":"mapbox","z":1,"x":1,"y":1,
            "source":{"bucket":"b","key":"k"},"extra_field":"ignored"}"#;
        assert!(TileJobMessage::parse(body).is_ok());
    }
}
