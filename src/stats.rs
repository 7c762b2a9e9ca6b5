//! Summary statistics over an assembled point sequence.

use serde::{Deserialize, Serialize};

use crate::geo_utils::{compute_bounds, track_length_km};
use crate::{Bounds, TrackPoint};

/// Distance, timing and elevation summary of a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStatistics {
    pub point_count: usize,
    pub total_distance_km: f64,
    /// Seconds between the first and last point, when both are timed
    pub duration_secs: Option<i64>,
    /// Only when the duration is positive
    pub average_speed_kmh: Option<f64>,
    /// Sum of climbs between consecutive points that both have altitude
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
    pub min_elevation_m: Option<f64>,
    pub max_elevation_m: Option<f64>,
    pub bounds: Option<Bounds>,
}

impl TrackStatistics {
    /// Compute statistics over `points` in their current order.
    pub fn from_points(points: &[TrackPoint]) -> Self {
        let total_distance_km = track_length_km(points);

        let duration_secs = match (points.first(), points.last()) {
            (Some(first), Some(last)) => match (first.timestamp, last.timestamp) {
                (Some(start), Some(end)) => Some((end - start).num_seconds()),
                _ => None,
            },
            _ => None,
        };
        let average_speed_kmh = duration_secs
            .filter(|secs| *secs > 0)
            .map(|secs| total_distance_km / (secs as f64 / 3600.0));

        let mut elevation_gain_m = 0.0;
        let mut elevation_loss_m = 0.0;
        for pair in points.windows(2) {
            if let (Some(a), Some(b)) = (pair[0].altitude, pair[1].altitude) {
                let diff = b - a;
                if diff > 0.0 {
                    elevation_gain_m += diff;
                } else {
                    elevation_loss_m -= diff;
                }
            }
        }

        let altitudes = points.iter().filter_map(|p| p.altitude);
        let min_elevation_m = altitudes.clone().reduce(f64::min);
        let max_elevation_m = altitudes.reduce(f64::max);

        Self {
            point_count: points.len(),
            total_distance_km,
            duration_secs,
            average_speed_kmh,
            elevation_gain_m,
            elevation_loss_m,
            min_elevation_m,
            max_elevation_m,
            bounds: compute_bounds(points),
        }
    }
}
