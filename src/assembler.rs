//! Merging point sources into one ordered, distance-annotated sequence.

use std::cmp::Ordering;

use crate::geo_utils::haversine_distance_km;
use crate::TrackPoint;

/// Concatenate `existing` and `new`, sort by timestamp, and recompute
/// cumulative distances over the whole result.
///
/// The sort is stable. Two points are only ordered when both have a
/// timestamp; a point without one compares equal to everything and keeps its
/// insertion position relative to its neighbours.
pub fn assemble(existing: Vec<TrackPoint>, new: Vec<TrackPoint>) -> Vec<TrackPoint> {
    let mut points = existing;
    points.extend(new);
    let mut points = merge_sort(points);
    recompute_distances(&mut points);
    points
}

/// Stable bottom-up merge sort.
///
/// `compare_timestamps` is not a total order once untimed points are mixed
/// in, which `slice::sort_by` may panic on.
fn merge_sort(points: Vec<TrackPoint>) -> Vec<TrackPoint> {
    let mut runs: Vec<Vec<TrackPoint>> = points.into_iter().map(|p| vec![p]).collect();
    while runs.len() > 1 {
        let mut merged = Vec::with_capacity(runs.len().div_ceil(2));
        let mut iter = runs.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => merged.push(merge(left, right)),
                None => merged.push(left),
            }
        }
        runs = merged;
    }
    runs.pop().unwrap_or_default()
}

fn merge(left: Vec<TrackPoint>, right: Vec<TrackPoint>) -> Vec<TrackPoint> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare_timestamps(r, l) == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
    out
}

fn compare_timestamps(a: &TrackPoint, b: &TrackPoint) -> Ordering {
    match (a.timestamp, b.timestamp) {
        (Some(ta), Some(tb)) => ta.cmp(&tb),
        _ => Ordering::Equal,
    }
}

/// Recompute cumulative great-circle distance from the first point.
/// Index 0 is always 0.
pub fn recompute_distances(points: &mut [TrackPoint]) {
    let mut total = 0.0;
    let mut previous: Option<(f64, f64)> = None;

    for point in points.iter_mut() {
        if let Some((lat, lon)) = previous {
            let step = haversine_distance_km(lat, lon, point.latitude, point.longitude);
            if step.is_finite() {
                total += step;
            }
        }
        point.distance_km = total;
        previous = Some((point.latitude, point.longitude));
    }
}
