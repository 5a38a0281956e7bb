use crate::geo::Coordinate;
use crate::record::{Located, Timestamp};
use chrono::DateTime;
use serde_json::{Map, Value as JsonValue};

/// Turns one raw stream line into a `(timestamp, coordinate)` record.
///
/// Every `None` is a soft skip: the caller logs it and moves on.
pub fn extract_location(raw: &str) -> Option<Located> {
    let Some(post) = parse_post(raw) else {
        tracing::info!(record = raw, "could not be parsed; skipping");
        return None;
    };
    let Some(timestamp) = post_timestamp(&post) else {
        tracing::info!(record = raw, "has no timestamp; skipping");
        return None;
    };
    let Some(coordinate) = post_coordinate(&post) else {
        tracing::info!(record = raw, "has no coordinates; skipping");
        return None;
    };
    tracing::info!(%timestamp, %coordinate, "extracted location");
    Some(Located::new(timestamp, coordinate))
}

pub fn parse_post(raw: &str) -> Option<Map<String, JsonValue>> {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Object(obj)) => Some(obj),
        Ok(other) => {
            tracing::debug!(kind = json_kind(&other), "decoded record is not an object");
            None
        }
        Err(err) => {
            tracing::debug!(error = %err, "failed to decode record json");
            None
        }
    }
}

/// `data.created_at`, which must carry an explicit offset.
pub fn post_timestamp(post: &Map<String, JsonValue>) -> Option<Timestamp> {
    let raw = post.get("data")?.get("created_at")?.as_str()?;
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(ts) => Some(ts),
        Err(err) => {
            tracing::debug!(created_at = raw, error = %err, "failed to parse timestamp");
            None
        }
    }
}

/// Prefers the post's own geo; otherwise the first attached place whose geo
/// resolves.
pub fn post_coordinate(post: &Map<String, JsonValue>) -> Option<Coordinate> {
    if let Some(coordinate) = post
        .get("data")
        .and_then(|data| data.get("geo"))
        .and_then(coordinate_from_geo)
    {
        return Some(coordinate);
    }

    post.get("includes")?
        .get("places")?
        .as_array()?
        .iter()
        .filter_map(|place| place.get("geo"))
        .find_map(coordinate_from_geo)
}

/// Reads a GeoJSON-ish object: an explicit point first, then the centre of
/// its bounding box.
pub fn coordinate_from_geo(geo: &JsonValue) -> Option<Coordinate> {
    let geo = geo.as_object()?;

    let mut coordinates = geo.get("coordinates");
    if let Some(JsonValue::Object(point)) = coordinates {
        coordinates = point.get("coordinates");
    }
    match coordinates {
        Some(JsonValue::Array(values)) if matches!(values.len(), 2 | 3) => {
            match (as_number(&values[0]), as_number(&values[1])) {
                (Some(lon), Some(lat)) => {
                    if let Some(coordinate) = Coordinate::new(lon, lat) {
                        return Some(coordinate);
                    }
                    tracing::debug!(?values, "point is not finite");
                }
                _ => tracing::debug!(?values, "failed to convert point"),
            }
        }
        Some(JsonValue::Null) | None => {}
        Some(other) => tracing::debug!(coordinates = %other, "did not understand point"),
    }

    match geo.get("bbox") {
        Some(JsonValue::Array(values)) if matches!(values.len(), 4 | 6) => {
            let numbers: Option<Vec<f64>> = values.iter().map(as_number).collect();
            let Some(numbers) = numbers else {
                tracing::debug!(?values, "failed to convert bounding box");
                return None;
            };
            // [w, s, e, n] or, with altitude, [w, s, lo, e, n, hi].
            let (west, south, east, north) = if numbers.len() == 4 {
                (numbers[0], numbers[1], numbers[2], numbers[3])
            } else {
                (numbers[0], numbers[1], numbers[3], numbers[4])
            };
            Coordinate::midpoint(west, south, east, north)
        }
        Some(JsonValue::Null) | None => None,
        Some(other) => {
            tracing::debug!(bbox = %other, "did not understand bounding box");
            None
        }
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinate(lon: f64, lat: f64) -> Coordinate {
        Coordinate::new(lon, lat).unwrap()
    }

    #[test]
    fn point_geo_yields_longitude_then_latitude() {
        let geo = json!({"coordinates": {"type": "Point", "coordinates": [12.5, 45.0]}});
        assert_eq!(coordinate_from_geo(&geo), Some(coordinate(12.5, 45.0)));
    }

    #[test]
    fn bare_point_array_and_altitude_are_accepted() {
        let geo = json!({"coordinates": [12.5, 45.0, 120.0]});
        assert_eq!(coordinate_from_geo(&geo), Some(coordinate(12.5, 45.0)));
    }

    #[test]
    fn bounding_box_yields_its_midpoint() {
        let geo = json!({"type": "Feature", "bbox": [10, 40, 15, 50]});
        assert_eq!(coordinate_from_geo(&geo), Some(coordinate(12.5, 45.0)));
    }

    #[test]
    fn three_dimensional_box_skips_altitude() {
        let geo = json!({"bbox": [10, 40, 0, 15, 50, 900]});
        assert_eq!(coordinate_from_geo(&geo), Some(coordinate(12.5, 45.0)));
    }

    #[test]
    fn unreadable_point_falls_back_to_box() {
        let geo = json!({"coordinates": ["east", "north"], "bbox": [10, 40, 15, 50]});
        assert_eq!(coordinate_from_geo(&geo), Some(coordinate(12.5, 45.0)));
    }

    #[test]
    fn malformed_geo_yields_nothing() {
        assert_eq!(coordinate_from_geo(&json!({"coordinates": [1.0]})), None);
        assert_eq!(coordinate_from_geo(&json!({"bbox": [1, 2, 3]})), None);
        assert_eq!(coordinate_from_geo(&json!({"bbox": [1, "x", 3, 4]})), None);
        assert_eq!(coordinate_from_geo(&json!([12.5, 45.0])), None);
    }

    #[test]
    fn falls_back_to_first_resolvable_place() {
        let raw = json!({
            "data": {"created_at": "2021-10-01T12:00:00.000Z", "geo": {"place_id": "abc"}},
            "includes": {"places": [
                {"id": "no-geo"},
                {"geo": {"bbox": "nonsense"}},
                {"geo": {"bbox": [10, 40, 15, 50]}},
                {"geo": {"bbox": [0, 0, 2, 2]}}
            ]}
        })
        .to_string();
        let located = extract_location(&raw).unwrap();
        assert_eq!(located.value, coordinate(12.5, 45.0));
    }

    #[test]
    fn post_without_any_geo_is_skipped() {
        let raw = r#"{"data": {"created_at": "2021-10-01T12:00:00Z", "text": "hi"}}"#;
        assert!(extract_location(raw).is_none());
    }

    #[test]
    fn timestamp_keeps_its_offset() {
        let raw = json!({
            "data": {"created_at": "2021-10-01T14:00:00+02:00", "geo": {"coordinates": {"coordinates": [1, 2]}}}
        })
        .to_string();
        let located = extract_location(&raw).unwrap();
        assert_eq!(located.timestamp.to_rfc3339(), "2021-10-01T14:00:00+02:00");
    }

    #[test]
    fn missing_or_naive_timestamp_is_skipped() {
        let geo = json!({"coordinates": {"coordinates": [1, 2]}});
        let missing = json!({"data": {"geo": geo}}).to_string();
        let naive = json!({"data": {"created_at": "2021-10-01 12:00:00", "geo": geo}}).to_string();
        let wrong_type = json!({"data": {"created_at": 1633089600, "geo": geo}}).to_string();
        assert!(extract_location(&missing).is_none());
        assert!(extract_location(&naive).is_none());
        assert!(extract_location(&wrong_type).is_none());
    }

    #[test]
    fn non_object_and_invalid_json_are_skipped() {
        assert!(extract_location("[1, 2, 3]").is_none());
        assert!(extract_location("{not json").is_none());
        assert!(extract_location("").is_none());
    }
}
