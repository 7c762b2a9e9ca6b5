//! # Track Ingest
//!
//! Turns heterogeneous GPS sources into one time-ordered, distance-annotated
//! point sequence.
//!
//! This library provides:
//! - Track file parsing for GPX, KML and GeoJSON
//! - Batched EXIF geolocation extraction from photos under a memory ceiling
//! - Time-based placement of photos without coordinates ("orphans") onto a track
//! - Assembly of all sources into a sorted sequence with cumulative distance
//!
//! ## Features
//!
//! - **`parallel`** - Extract photos within a chunk in parallel with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use track_ingest::{parse_track, TrackSet};
//!
//! let gpx = r#"<?xml version="1.0"?>
//! <gpx version="1.1"><trk><trkseg>
//!   <trkpt lat="47.0" lon="8.0"><time>2023-06-15T10:00:00Z</time></trkpt>
//!   <trkpt lat="47.01" lon="8.01"><time>2023-06-15T10:10:00Z</time></trkpt>
//! </trkseg></trk></gpx>"#;
//!
//! let points = parse_track(gpx.as_bytes(), "gpx").unwrap();
//! assert_eq!(points.len(), 2);
//!
//! let set = TrackSet::default().with_track_points(points);
//! assert!(set.points[1].distance_km > 1.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod assembler;
pub mod batch;
pub mod config;
pub mod error;
pub mod geo_utils;
pub mod memory;
pub mod parsers;
pub mod photo;
pub mod stats;
pub mod sync;
pub mod track_set;
pub mod validation;

pub use assembler::{assemble, recompute_distances};
pub use batch::{
    process_batch, BatchJob, BatchOutcome, BatchStats, BatchStatus, ByteSource, CancelFlag,
    ChunkProgress, PhotoFile, ProgressCallback,
};
pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use memory::{FixedMemorySampler, MemorySampler, ProcessMemorySampler};
pub use parsers::{parse_track, TrackFormat};
pub use photo::{extract_photo, DiscardReason, PhotoClassification};
pub use stats::TrackStatistics;
pub use sync::{reconcile, SyncResult};
pub use track_set::{IngestReport, TrackSet, TrackSummary};

// ============================================================================
// Core Types
// ============================================================================

/// Where a point came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    /// Parsed from a GPX, KML or GeoJSON track file
    Track,
    /// Read from a photo's embedded geolocation
    Photo,
    /// An orphaned photo placed onto the track by time
    Interpolated,
}

/// The canonical point every source is converted into.
///
/// # Example
/// ```
/// use track_ingest::{PointSource, TrackPoint};
/// let point = TrackPoint::new(51.5074, -0.1278); // London
/// assert_eq!(point.source, PointSource::Track);
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Degrees, [-90, 90]
    pub latitude: f64,
    /// Degrees, [-180, 180]
    pub longitude: f64,
    /// Meters, [-500, 9000]
    pub altitude: Option<f64>,
    /// UTC instant between 1990-01-01 and now
    pub timestamp: Option<DateTime<Utc>>,
    /// Cumulative great-circle distance from the first point, in km.
    /// Only meaningful after [`assemble`] or [`recompute_distances`].
    pub distance_km: f64,
    pub source: PointSource,
    /// File name of the photo this point came from
    pub source_file: Option<String>,
}

impl TrackPoint {
    /// Create a track-file point with no altitude or timestamp.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            timestamp: None,
            distance_km: 0.0,
            source: PointSource::Track,
            source_file: None,
        }
    }

    pub fn with_altitude(mut self, altitude: Option<f64>) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        geo_utils::is_valid_coordinate(self.latitude, self.longitude)
    }

    /// True for points that can anchor orphan synchronization.
    pub fn is_timed_track_point(&self) -> bool {
        self.source == PointSource::Track && self.timestamp.is_some()
    }
}

/// A photo with a usable capture time but no usable coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanRecord {
    pub timestamp: DateTime<Utc>,
    /// File name of the source photo
    pub source_file: String,
}

impl OrphanRecord {
    pub fn new(timestamp: DateTime<Utc>, source_file: impl Into<String>) -> Self {
        Self { timestamp, source_file: source_file.into() }
    }
}

/// Bounding box of a point sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center (lat, lng) of the bounds.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
