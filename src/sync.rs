//! Time-based placement of orphaned photos onto a track.
//!
//! Only points from track files that carry a timestamp can anchor an orphan.
//! For each orphan the nearest anchor at or before its time (`before`) and
//! the nearest strictly after it (`after`) are found:
//!
//! | Anchors | Result |
//! |---------|--------|
//! | both | linear interpolation by time |
//! | `before` only, gap < tolerance | snap to `before` |
//! | `after` only, gap < tolerance | snap to `after` |
//! | otherwise | stays orphaned |
//!
//! The tolerance comparison is strict: an orphan exactly `tolerance` away
//! from the only anchor stays orphaned.
//!
//! Altitude is interpolated only when both anchors have one; otherwise
//! `before`'s altitude is used as-is, even when only `after` has one.

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{OrphanRecord, PointSource, TrackPoint};

/// Partition of orphans after a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// New points with [`PointSource::Interpolated`]
    pub promoted: Vec<TrackPoint>,
    pub still_orphaned: Vec<OrphanRecord>,
}

/// Place orphans onto the timed track points of `track_points`.
///
/// Neither input is modified, and the result depends only on the inputs, so
/// re-running after new track data arrives is safe.
///
/// # Example
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use track_ingest::{reconcile, OrphanRecord, TrackPoint};
///
/// let t0 = Utc.with_ymd_and_hms(2023, 6, 15, 10, 0, 0).unwrap();
/// let track = vec![
///     TrackPoint::new(10.0, 10.0).with_timestamp(Some(t0)),
///     TrackPoint::new(10.01, 10.01).with_timestamp(Some(t0 + Duration::seconds(100))),
/// ];
/// let orphans = vec![OrphanRecord::new(t0 + Duration::seconds(50), "IMG_0042.jpg")];
///
/// let result = reconcile(&orphans, &track, Duration::minutes(5));
/// assert_eq!(result.promoted.len(), 1);
/// assert!((result.promoted[0].latitude - 10.005).abs() < 1e-9);
/// ```
pub fn reconcile(orphans: &[OrphanRecord], track_points: &[TrackPoint], tolerance: Duration) -> SyncResult {
    let mut anchors: Vec<(DateTime<Utc>, &TrackPoint)> = track_points
        .iter()
        .filter(|p| p.source == PointSource::Track)
        .filter_map(|p| p.timestamp.map(|t| (t, p)))
        .collect();

    if anchors.is_empty() {
        return SyncResult { promoted: Vec::new(), still_orphaned: orphans.to_vec() };
    }
    anchors.sort_by_key(|(t, _)| *t);

    let mut result = SyncResult::default();
    for orphan in orphans {
        match place(orphan, &anchors, tolerance) {
            Some(point) => result.promoted.push(point),
            None => result.still_orphaned.push(orphan.clone()),
        }
    }

    info!(
        "[TemporalSync] Matched {} of {} orphans against {} track points",
        result.promoted.len(),
        orphans.len(),
        anchors.len()
    );
    result
}

fn place(
    orphan: &OrphanRecord,
    anchors: &[(DateTime<Utc>, &TrackPoint)],
    tolerance: Duration,
) -> Option<TrackPoint> {
    let t = orphan.timestamp;
    // First anchor strictly after t; equal timestamps fall on the `before` side
    let split = anchors.partition_point(|(anchor_time, _)| *anchor_time <= t);
    let before = split.checked_sub(1).map(|i| anchors[i]);
    let after = anchors.get(split).copied();

    let (latitude, longitude, altitude) = match (before, after) {
        (Some((t0, p0)), Some((t1, p1))) => {
            let span = seconds(t1 - t0);
            // Zero span collapses onto `before`, the inclusive bound
            let fraction = if span > 0.0 { seconds(t - t0) / span } else { 0.0 };
            let altitude = match (p0.altitude, p1.altitude) {
                (Some(a0), Some(a1)) => Some(lerp(a0, a1, fraction)),
                (a0, _) => a0,
            };
            (
                lerp(p0.latitude, p1.latitude, fraction),
                lerp(p0.longitude, p1.longitude, fraction),
                altitude,
            )
        }
        (Some((t0, p0)), None) if t - t0 < tolerance => (p0.latitude, p0.longitude, p0.altitude),
        (None, Some((t1, p1))) if t1 - t < tolerance => (p1.latitude, p1.longitude, p1.altitude),
        _ => return None,
    };

    Some(TrackPoint {
        latitude,
        longitude,
        altitude,
        timestamp: Some(t),
        distance_km: 0.0,
        source: PointSource::Interpolated,
        source_file: Some(orphan.source_file.clone()),
    })
}

/// Duration in fractional seconds, nanosecond precision when it fits in i64.
fn seconds(d: Duration) -> f64 {
    match d.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => d.num_milliseconds() as f64 / 1e3,
    }
}

#[inline]
fn lerp(a: f64, b: f64, fraction: f64) -> f64 {
    a + (b - a) * fraction
}
