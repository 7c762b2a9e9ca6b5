//! # Geographic Utilities
//!
//! Great-circle math over latitude/longitude pairs. Every other component
//! depends on these and nothing here depends on them.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance_km`] | Great-circle distance between two coordinates |
//! | [`bearing_degrees`] | Initial bearing from one coordinate to another |
//! | [`track_length_km`] | Total length of a point sequence |
//! | [`is_valid_coordinate`] | Finite and within standard latitude/longitude bounds |
//! | [`compute_bounds`] | Bounding box of a point sequence |
//!
//! ## Example
//!
//! ```rust
//! use track_ingest::geo_utils;
//!
//! let km = geo_utils::haversine_distance_km(51.5074, -0.1278, 48.8566, 2.3522);
//! assert!((km - 343.5).abs() < 5.0); // London to Paris
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a spherical Earth (mean radius
//! 6,371 km) via the `geo` crate. Inputs are WGS84 degrees.

use geo::{Bearing, Distance, Haversine, Point};

use crate::{Bounds, TrackPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two coordinates in kilometres.
///
/// # Example
///
/// ```rust
/// use track_ingest::geo_utils;
///
/// assert_eq!(geo_utils::haversine_distance_km(10.0, 10.0, 10.0, 10.0), 0.0);
/// ```
#[inline]
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let point1 = Point::new(lon1, lat1);
    let point2 = Point::new(lon2, lat2);
    Haversine::distance(point1, point2) / 1000.0
}

/// Great-circle distance between two track points in kilometres.
#[inline]
pub fn point_distance_km(p1: &TrackPoint, p2: &TrackPoint) -> f64 {
    haversine_distance_km(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
}

/// Initial bearing from the first coordinate towards the second, in degrees
/// clockwise from north, normalised to `[0, 360)`.
pub fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let origin = Point::new(lon1, lat1);
    let destination = Point::new(lon2, lat2);
    let bearing = Haversine::bearing(origin, destination);
    (bearing % 360.0 + 360.0) % 360.0
}

/// Sum of great-circle distances between consecutive points, in kilometres.
///
/// Empty and single-point sequences have length 0.
pub fn track_length_km(points: &[TrackPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| point_distance_km(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Validation
// =============================================================================

/// Check that a coordinate pair is finite and within standard bounds.
#[inline]
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Bounding box of a point sequence, `None` when empty.
pub fn compute_bounds(points: &[TrackPoint]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }

    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Some(Bounds { min_lat, max_lat, min_lng, max_lng })
}

// =============================================================================
// Unit Tests
// =============================================================================
