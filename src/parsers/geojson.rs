use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;

use super::{build_point, parse_time_text, TrackParser};
use crate::error::Result;
use crate::validation::sanitize_timestamp;
use crate::TrackPoint;

/// GeoJSON parser.
///
/// Recognizes a `Feature` or a `FeatureCollection` whose features carry
/// `LineString` or `MultiLineString` geometries; everything else is ignored.
/// Positions are `[lon, lat, alt?]`.
///
/// Timestamps come from `properties.coordTimes` (one entry per position, one
/// array per line for `MultiLineString`) when present, otherwise from
/// `properties.time`, which then applies to every position of the feature.
pub struct GeoJsonParser;

impl TrackParser for GeoJsonParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<TrackPoint>> {
        let data: Value = serde_json::from_slice(bytes)?;

        let features: Vec<&Value> = match data.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => data
                .get("features")
                .and_then(Value::as_array)
                .map(|f| f.iter().collect())
                .unwrap_or_default(),
            Some("Feature") => vec![&data],
            other => {
                debug!("[GeoJsonParser] Ignoring top-level type {:?}", other);
                Vec::new()
            }
        };

        let mut points = Vec::new();
        let mut skipped = 0usize;
        for feature in features {
            skipped += extract_feature(feature, &mut points);
        }

        if skipped > 0 {
            debug!("[GeoJsonParser] Skipped {} points with invalid coordinates", skipped);
        }
        Ok(points)
    }

    fn name(&self) -> &'static str {
        "GeoJSON Parser"
    }
}

/// Append the feature's points, returning how many positions were skipped.
fn extract_feature(feature: &Value, points: &mut Vec<TrackPoint>) -> usize {
    let Some(geometry) = feature.get("geometry") else {
        return 0;
    };
    let Some(coordinates) = geometry.get("coordinates").and_then(Value::as_array) else {
        return 0;
    };

    let properties = feature.get("properties");
    let feature_time = properties.and_then(|p| p.get("time")).and_then(parse_time_value);
    let coord_times = properties
        .and_then(|p| p.get("coordTimes"))
        .and_then(Value::as_array);

    // (positions, per-position times) for each line
    let lines: Vec<(&Vec<Value>, Option<&Vec<Value>>)> =
        match geometry.get("type").and_then(Value::as_str) {
            Some("LineString") => vec![(coordinates, coord_times)],
            Some("MultiLineString") => coordinates
                .iter()
                .enumerate()
                .filter_map(|(i, line)| {
                    let times = coord_times
                        .and_then(|t| t.get(i))
                        .and_then(Value::as_array);
                    line.as_array().map(|positions| (positions, times))
                })
                .collect(),
            _ => return 0,
        };

    let mut skipped = 0;
    for (positions, times) in lines {
        for (i, position) in positions.iter().enumerate() {
            let timestamp = times
                .and_then(|t| t.get(i))
                .and_then(parse_time_value)
                .or(feature_time);
            match position_to_point(position, timestamp) {
                Some(point) => points.push(point),
                None => skipped += 1,
            }
        }
    }
    skipped
}

fn position_to_point(position: &Value, timestamp: Option<DateTime<Utc>>) -> Option<TrackPoint> {
    let position = position.as_array()?;
    let longitude = position.first().and_then(Value::as_f64).unwrap_or(f64::NAN);
    let latitude = position.get(1).and_then(Value::as_f64).unwrap_or(f64::NAN);
    let altitude = position.get(2).and_then(Value::as_f64);
    build_point(latitude, longitude, altitude, timestamp)
}

/// An ISO 8601 string or epoch milliseconds.
fn parse_time_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_time_text(s),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })?;
            sanitize_timestamp(DateTime::from_timestamp_millis(millis))
        }
        _ => None,
    }
}
