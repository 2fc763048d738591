//! Canonical tile identity.
//!
//! The message payload is untrusted for identity: a queue producer could
//! otherwise send two messages for "the same" coordinate with slightly
//! different representations and cause the pipeline to process it twice.
//! Identity is always recomputed from the numeric fields, never read off
//! the wire.

/// Effective zoom used for Google static-map requests when the manifest
/// row omits one.
pub const DEFAULT_GOOGLE_ZOOM: u32 = 18;

/// Decimal digits of precision used to canonicalize latitude/longitude.
pub const COORD_PRECISION: usize = 6;

/// Canonical identity for a Mapbox tile.
pub fn mapbox_tile_id(z: u32, x: u32, y: u32) -> String {
    format!("{z}/{x}/{y}")
}

/// Canonical identity for a Google coordinate. `lat`/`lon` are formatted to
/// exactly six fractional digits; Rust's fixed-precision float formatting
/// rounds the underlying binary value the same way Python's `f"{v:.6f}"`
/// does, so two floats that differ only in bits beyond the sixth decimal
/// digit converge on one string.
pub fn coord_tile_id(lat: f64, lon: f64, zoom: u32) -> String {
    format!(
        "coord:{lat:.prec$},{lon:.prec$},{zoom}",
        prec = COORD_PRECISION
    )
}

/// Dispatches to [`mapbox_tile_id`] or [`coord_tile_id`] based on source.
pub fn canonical_tile_id(
    source: &str,
    z: Option<u32>,
    x: Option<u32>,
    y: Option<u32>,
    lat: Option<f64>,
    lon: Option<f64>,
    zoom: Option<u32>,
) -> Option<String> {
    if source == "mapbox" {
        Some(mapbox_tile_id(z?, x?, y?))
    } else {
        Some(coord_tile_id(lat?, lon?, zoom.unwrap_or(DEFAULT_GOOGLE_ZOOM)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapbox_id_is_slash_separated() {
        assert_eq!(mapbox_tile_id(14, 8716, 5378), "14/8716/5378");
    }

    #[test]
    fn coord_id_rounds_to_six_decimals() {
        assert_eq!(coord_tile_id(12.345678, -7.654321, 18), "coord:12.345678,-7.654321,18");
    }

    #[test]
    fn coord_id_converges_past_sixth_decimal() {
        let a = coord_tile_id(1.2345678, 2.0, 18);
        let b = coord_tile_id(1.2345681, 2.0, 18);
        assert_eq!(a, b);
    }

    #[test]
    fn coord_id_defaults_zoom() {
        assert_eq!(
            canonical_tile_id("google", None, None, None, Some(12.345678), Some(-7.654321), None),
            Some("coord:12.345678,-7.654321,18".to_string())
        );
    }

    #[test]
    fn mapbox_id_requires_all_three_coordinates() {
        assert_eq!(
            canonical_tile_id("mapbox", Some(14), Some(8716), None, None, None, None),
            None
        );
    }
}
