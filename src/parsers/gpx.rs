use chrono::{DateTime, Utc};
use log::debug;
use quick_xml::events::{BytesStart, Event};

use super::{build_point, malformed, parse_f64, parse_time_text, xml_reader, ElementDepth, TrackParser};
use crate::error::Result;
use crate::TrackPoint;

/// GPX 1.0/1.1 parser. Track points (`<trkpt>`) and route points (`<rtept>`)
/// are treated identically; waypoints are not part of a track.
pub struct GpxParser;

impl TrackParser for GpxParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<TrackPoint>> {
        parse_gpx(bytes)
    }

    fn name(&self) -> &'static str {
        "GPX Parser"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Elevation,
    Time,
}

struct PendingPoint {
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

impl PendingPoint {
    /// Attribute syntax errors fail the whole document.
    fn from_element(e: &BytesStart) -> Result<Self> {
        let mut latitude = f64::NAN;
        let mut longitude = f64::NAN;

        for attr in e.attributes() {
            let attr = attr.map_err(malformed)?;
            let value = attr.unescape_value().map_err(malformed)?;
            match attr.key.local_name().as_ref() {
                b"lat" => latitude = parse_f64(&value),
                b"lon" => longitude = parse_f64(&value),
                _ => {}
            }
        }

        Ok(Self { latitude, longitude, altitude: None, timestamp: None })
    }

    fn finish(self) -> Option<TrackPoint> {
        build_point(self.latitude, self.longitude, self.altitude, self.timestamp)
    }
}

fn is_point_element(name: &[u8]) -> bool {
    matches!(name, b"trkpt" | b"rtept")
}

fn parse_gpx(bytes: &[u8]) -> Result<Vec<TrackPoint>> {
    let mut reader = xml_reader(bytes);
    let mut buf = Vec::new();
    let mut depth = ElementDepth::default();

    let mut points = Vec::new();
    let mut skipped = 0usize;
    let mut pending: Option<PendingPoint> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth.open()?;
                let name = e.local_name();
                if is_point_element(name.as_ref()) {
                    pending = Some(PendingPoint::from_element(&e)?);
                } else if pending.is_some() {
                    field = match name.as_ref() {
                        b"ele" => Some(Field::Elevation),
                        b"time" => Some(Field::Time),
                        _ => None,
                    };
                    text.clear();
                }
            }
            Event::Empty(e) => {
                depth.empty()?;
                // <trkpt lat=".." lon=".."/> carries no children
                if is_point_element(e.local_name().as_ref()) {
                    match PendingPoint::from_element(&e)?.finish() {
                        Some(point) => points.push(point),
                        None => skipped += 1,
                    }
                }
            }
            Event::Text(e) => {
                depth.text(&e)?;
                if field.is_some() {
                    text.push_str(&e.unescape().map_err(malformed)?);
                }
            }
            Event::CData(e) => {
                depth.text(&e)?;
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(e) => {
                depth.close()?;
                let name = e.local_name();
                if is_point_element(name.as_ref()) {
                    if let Some(p) = pending.take() {
                        match p.finish() {
                            Some(point) => points.push(point),
                            None => skipped += 1,
                        }
                    }
                    field = None;
                } else if let (Some(f), Some(p)) = (field.take(), pending.as_mut()) {
                    match f {
                        Field::Elevation => p.altitude = Some(parse_f64(&text)).filter(|a| a.is_finite()),
                        Field::Time => p.timestamp = parse_time_text(&text),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    depth.finish()?;

    if skipped > 0 {
        debug!("[GpxParser] Skipped {} points with invalid coordinates", skipped);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use chrono::TimeZone;

    const TRACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata><time>2023-06-15T09:00:00Z</time></metadata>
  <trk>
    <name>Morning walk</name>
    <trkseg>
      <trkpt lat="47.3769" lon="8.5417"><ele>408.5</ele><time>2023-06-15T10:00:00Z</time></trkpt>
      <trkpt lat="47.3780" lon="8.5430"><ele>410.0</ele><time>2023-06-15T10:01:00Z</time></trkpt>
      <trkpt lat="47.3791" lon="8.5442"/>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_parse_track_points_in_order() {
        let points = GpxParser.parse(TRACK.as_bytes()).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].latitude, 47.3769);
        assert_eq!(points[0].longitude, 8.5417);
        assert_eq!(points[0].altitude, Some(408.5));
        assert_eq!(
            points[0].timestamp,
            Some(Utc.with_ymd_and_hms(2023, 6, 15, 10, 0, 0).unwrap())
        );
        assert_eq!(points[1].latitude, 47.3780);
        assert_eq!(points[2].altitude, None);
        assert_eq!(points[2].timestamp, None);
    }

    #[test]
    fn test_route_points_match_track_points() {
        let route = r#"<gpx><rte>
            <rtept lat="47.3769" lon="8.5417"><ele>408.5</ele><time>2023-06-15T10:00:00Z</time></rtept>
            <rtept lat="47.3780" lon="8.5430"><ele>410.0</ele><time>2023-06-15T10:01:00Z</time></rtept>
            <rtept lat="47.3791" lon="8.5442"/>
        </rte></gpx>"#;
        let from_route = GpxParser.parse(route.as_bytes()).unwrap();
        let from_track = GpxParser.parse(TRACK.as_bytes()).unwrap();
        assert_eq!(from_route, from_track);
    }

    #[test]
    fn test_invalid_points_are_skipped() {
        let gpx = r#"<gpx><trk><trkseg>
            <trkpt lat="95.0" lon="8.0"/>
            <trkpt lat="abc" lon="8.0"/>
            <trkpt lon="8.0"><ele>1</ele></trkpt>
            <trkpt lat="47.0" lon="8.0"><ele>99999</ele><time>2999-01-01T00:00:00Z</time></trkpt>
        </trkseg></trk></gpx>"#;
        let points = GpxParser.parse(gpx.as_bytes()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].altitude, None);
        assert_eq!(points[0].timestamp, None);
    }

    #[test]
    fn test_waypoints_are_not_track_points() {
        let gpx = r#"<gpx><wpt lat="47.0" lon="8.0"><time>2023-06-15T10:00:00Z</time></wpt></gpx>"#;
        assert!(GpxParser.parse(gpx.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml() {
        let truncated = r#"<gpx><trk><trkseg><trkpt lat="47.0" lon="8.0">"#;
        assert!(matches!(
            GpxParser.parse(truncated.as_bytes()),
            Err(IngestError::MalformedInput(_))
        ));

        let mismatched = r#"<gpx><trk></gpx>"#;
        assert!(matches!(
            GpxParser.parse(mismatched.as_bytes()),
            Err(IngestError::MalformedInput(_))
        ));

        assert!(matches!(GpxParser.parse(b""), Err(IngestError::MalformedInput(_))));
    }

    #[test]
    fn test_attribute_errors_are_malformed() {
        let unquoted = r#"<gpx><trk><trkseg><trkpt lat=47.0 lon=8.0/></trkseg></trk></gpx>"#;
        let duplicated = r#"<gpx><trk><trkseg><trkpt lat="47.0" lat="48.0" lon="8.0"/></trkseg></trk></gpx>"#;
        let bad_entity = r#"<gpx><trk><trkseg><trkpt lat="47&bogus;" lon="8.0"/></trkseg></trk></gpx>"#;
        for gpx in [unquoted, duplicated, bad_entity] {
            assert!(
                matches!(GpxParser.parse(gpx.as_bytes()), Err(IngestError::MalformedInput(_))),
                "accepted {}",
                gpx
            );
        }
    }

    #[test]
    fn test_stray_text_and_second_root_are_malformed() {
        for gpx in ["junk text<gpx/>", "<gpx/><gpx/>", "<gpx></gpx>trailing"] {
            assert!(
                matches!(GpxParser.parse(gpx.as_bytes()), Err(IngestError::MalformedInput(_))),
                "accepted {}",
                gpx
            );
        }
        // Prolog and trailing whitespace are fine
        assert!(GpxParser.parse(b"<?xml version=\"1.0\"?>\n<gpx/>\n").unwrap().is_empty());
    }
}
