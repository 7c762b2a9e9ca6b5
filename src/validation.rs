//! Range, type and size predicates applied before data enters a track.

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::IngestConfig;

/// Lowest accepted altitude in meters.
pub const MIN_ALTITUDE_M: f64 = -500.0;
/// Highest accepted altitude in meters.
pub const MAX_ALTITUDE_M: f64 = 9000.0;

/// Earliest accepted timestamp (1990-01-01T00:00:00Z).
pub fn min_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1990, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Check that an altitude is finite and within [-500, 9000] m.
#[inline]
pub fn is_valid_altitude(altitude: f64) -> bool {
    altitude.is_finite() && (MIN_ALTITUDE_M..=MAX_ALTITUDE_M).contains(&altitude)
}

/// Keep an altitude only if it passes [`is_valid_altitude`].
#[inline]
pub fn sanitize_altitude(altitude: Option<f64>) -> Option<f64> {
    altitude.filter(|a| is_valid_altitude(*a))
}

/// Check that a timestamp lies within [1990-01-01, `now`].
pub fn is_valid_timestamp_at(timestamp: &DateTime<Utc>, now: &DateTime<Utc>) -> bool {
    *timestamp >= min_timestamp() && timestamp <= now
}

/// Check that a timestamp lies within [1990-01-01, now].
pub fn is_valid_timestamp(timestamp: &DateTime<Utc>) -> bool {
    is_valid_timestamp_at(timestamp, &Utc::now())
}

/// Keep a timestamp only if it passes [`is_valid_timestamp`].
pub fn sanitize_timestamp(timestamp: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    timestamp.filter(is_valid_timestamp)
}

/// Why a photo file was rejected before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRejection {
    TooSmall,
    TooLarge,
    MediaType,
    Extension,
}

/// Check a photo's declared size, media type and file name against the
/// configured allow-lists.
pub fn check_photo_file(
    name: &str,
    media_type: &str,
    size: u64,
    config: &IngestConfig,
) -> Result<(), FileRejection> {
    if size < config.min_file_size_bytes {
        return Err(FileRejection::TooSmall);
    }
    if size > config.max_file_size_bytes {
        return Err(FileRejection::TooLarge);
    }

    let media_type = media_type.trim().to_ascii_lowercase();
    if !config
        .allowed_media_types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(&media_type))
    {
        return Err(FileRejection::MediaType);
    }

    let name = name.to_ascii_lowercase();
    if !config
        .allowed_extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
    {
        return Err(FileRejection::Extension);
    }

    Ok(())
}
