//! Track file parsing.
//!
//! Each format has a parser turning raw file bytes into canonical
//! [`TrackPoint`]s in source order. [`parse_track`] dispatches on the file
//! extension. Parsers are pure: no I/O, no shared state.
//!
//! Point hygiene is the same for every format: a point whose coordinates fail
//! [`crate::geo_utils::is_valid_coordinate`] is skipped, while an out-of-range
//! altitude or timestamp is dropped from an otherwise valid point.

pub mod geojson;
pub mod gpx;
pub mod kml;

use std::fmt::Display;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::validation::{sanitize_altitude, sanitize_timestamp};
use crate::TrackPoint;

pub use geojson::GeoJsonParser;
pub use gpx::GpxParser;
pub use kml::KmlParser;

// extract Vec<TrackPoint> from different file types
pub trait TrackParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<TrackPoint>>;

    fn name(&self) -> &'static str;
}

/// The closed set of supported track encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackFormat {
    Gpx,
    Kml,
    GeoJson,
}

impl TrackFormat {
    /// Resolve a file extension (with or without the leading dot, any case).
    pub fn from_extension(extension: &str) -> Result<Self> {
        let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "gpx" => Ok(TrackFormat::Gpx),
            "kml" => Ok(TrackFormat::Kml),
            "json" | "geojson" => Ok(TrackFormat::GeoJson),
            _ => Err(IngestError::UnsupportedFormat(ext)),
        }
    }

    /// Resolve the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        Self::from_extension(ext)
    }

    /// True if the file name carries a track extension.
    pub fn is_track_file(name: &str) -> bool {
        Self::from_file_name(name).is_ok()
    }

    pub fn parser(self) -> &'static dyn TrackParser {
        match self {
            TrackFormat::Gpx => &GpxParser,
            TrackFormat::Kml => &KmlParser,
            TrackFormat::GeoJson => &GeoJsonParser,
        }
    }
}

/// Parse a track file given its bytes and extension.
///
/// Unknown extensions fail with [`IngestError::UnsupportedFormat`] before any
/// byte is read. Unparseable containers fail with
/// [`IngestError::MalformedInput`].
///
/// # Example
/// ```
/// use track_ingest::{parse_track, IngestError};
///
/// let err = parse_track(b"anything", "txt").unwrap_err();
/// assert!(matches!(err, IngestError::UnsupportedFormat(_)));
/// ```
pub fn parse_track(bytes: &[u8], extension: &str) -> Result<Vec<TrackPoint>> {
    let parser = TrackFormat::from_extension(extension)?.parser();
    let points = parser.parse(bytes)?;
    info!("[TrackParser] {} extracted {} points", parser.name(), points.len());
    Ok(points)
}

// ============================================================================
// Shared helpers
// ============================================================================

pub(crate) fn malformed<E: Display>(e: E) -> IngestError {
    IngestError::MalformedInput(e.to_string())
}

pub(crate) fn xml_reader(bytes: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    reader
}

/// Parse an ISO 8601 timestamp; values without an offset are read as UTC.
pub(crate) fn parse_time_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        });
    sanitize_timestamp(parsed)
}

/// Build a track point, or `None` if the coordinates are unusable.
pub(crate) fn build_point(
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
) -> Option<TrackPoint> {
    let point = TrackPoint::new(latitude, longitude)
        .with_altitude(sanitize_altitude(altitude))
        .with_timestamp(timestamp);
    if point.is_valid() {
        Some(point)
    } else {
        debug!("[TrackParser] Skipping invalid coordinate ({}, {})", latitude, longitude);
        None
    }
}

pub(crate) fn parse_f64(text: &str) -> f64 {
    text.trim().parse().unwrap_or(f64::NAN)
}

/// Tracks element nesting so truncated documents, stray top-level text and
/// multiple roots are reported as malformed.
#[derive(Debug, Default)]
pub(crate) struct ElementDepth {
    open: usize,
    saw_root: bool,
}

impl ElementDepth {
    pub(crate) fn open(&mut self) -> Result<()> {
        self.enter_root()?;
        self.open += 1;
        Ok(())
    }

    pub(crate) fn empty(&mut self) -> Result<()> {
        self.enter_root()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.open = self
            .open
            .checked_sub(1)
            .ok_or_else(|| malformed("unexpected closing tag"))?;
        Ok(())
    }

    /// Character data is only allowed inside the root element.
    pub(crate) fn text(&self, raw: &[u8]) -> Result<()> {
        let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
        if self.open == 0 && raw.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(malformed("text outside the root element"));
        }
        Ok(())
    }

    pub(crate) fn finish(&self) -> Result<()> {
        if !self.saw_root {
            return Err(malformed("document has no root element"));
        }
        if self.open > 0 {
            return Err(malformed(format!("{} unclosed element(s)", self.open)));
        }
        Ok(())
    }

    fn enter_root(&mut self) -> Result<()> {
        if self.open == 0 {
            if self.saw_root {
                return Err(malformed("more than one root element"));
            }
            self.saw_root = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_extension_dispatch_is_case_insensitive() {
        assert_eq!(TrackFormat::from_extension("GPX").unwrap(), TrackFormat::Gpx);
        assert_eq!(TrackFormat::from_extension(".kml").unwrap(), TrackFormat::Kml);
        assert_eq!(TrackFormat::from_extension("GeoJSON").unwrap(), TrackFormat::GeoJson);
        assert_eq!(TrackFormat::from_extension("json").unwrap(), TrackFormat::GeoJson);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = TrackFormat::from_extension("txt").unwrap_err();
        assert_eq!(err, IngestError::UnsupportedFormat("txt".into()));
        // Rejected on the extension alone, bytes are irrelevant
        assert!(matches!(parse_track(b"<gpx/>", "txt"), Err(IngestError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(TrackFormat::from_file_name("ride.Track.GPX").unwrap(), TrackFormat::Gpx);
        assert!(TrackFormat::is_track_file("walk.geojson"));
        assert!(!TrackFormat::is_track_file("photo.jpg"));
        assert!(!TrackFormat::is_track_file("README"));
    }

    #[test]
    fn test_parse_time_text() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 15, 10, 0, 0).unwrap();
        assert_eq!(parse_time_text("2023-06-15T10:00:00Z"), Some(expected));
        assert_eq!(parse_time_text("2023-06-15T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_time_text(" 2023-06-15T10:00:00 "), Some(expected));
        assert_eq!(parse_time_text("1985-01-01T00:00:00Z"), None);
        assert_eq!(parse_time_text("yesterday"), None);
    }

    #[test]
    fn test_element_depth_rejects_second_root() {
        let mut depth = ElementDepth::default();
        depth.open().unwrap();
        depth.empty().unwrap();
        depth.close().unwrap();
        assert!(matches!(depth.empty(), Err(IngestError::MalformedInput(_))));
    }

    #[test]
    fn test_element_depth_rejects_top_level_text() {
        let mut depth = ElementDepth::default();
        assert!(depth.text(b" \n\t").is_ok());
        assert!(depth.text(b"\xEF\xBB\xBF").is_ok());
        assert!(depth.text(b"junk").is_err());
        depth.open().unwrap();
        assert!(depth.text(b"inside").is_ok());
    }

    #[test]
    fn test_build_point_drops_bad_altitude_keeps_point() {
        let point = build_point(10.0, 10.0, Some(20_000.0), None).unwrap();
        assert_eq!(point.altitude, None);
        assert!(build_point(100.0, 10.0, Some(5.0), None).is_none());
    }
}
