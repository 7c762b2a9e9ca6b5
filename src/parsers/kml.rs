use chrono::{DateTime, Utc};
use log::debug;
use quick_xml::events::Event;

use super::{build_point, malformed, parse_f64, parse_time_text, xml_reader, ElementDepth, TrackParser};
use crate::error::Result;
use crate::TrackPoint;

/// KML parser.
///
/// Reads `<LineString><coordinates>` tuples (`lon,lat[,alt]`, whitespace
/// separated, no timestamps) and Google Earth `<gx:Track>` elements, whose
/// `<when>` and `<gx:coord>` (`lon lat [alt]`) children pair up by position.
pub struct KmlParser;

impl TrackParser for KmlParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<TrackPoint>> {
        parse_kml(bytes)
    }

    fn name(&self) -> &'static str {
        "KML Parser"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Coordinates,
    When,
    Coord,
}

#[derive(Default)]
struct GxTrack {
    whens: Vec<Option<DateTime<Utc>>>,
    coords: Vec<String>,
}

struct KmlState {
    points: Vec<TrackPoint>,
    skipped: usize,
}

impl KmlState {
    fn push(&mut self, point: Option<TrackPoint>) {
        match point {
            Some(p) => self.points.push(p),
            None => self.skipped += 1,
        }
    }

    /// `lon,lat[,alt]` tuples separated by whitespace.
    fn push_coordinates(&mut self, text: &str) {
        for tuple in text.split_whitespace() {
            let parts: Vec<&str> = tuple.split(',').collect();
            if parts.len() < 2 {
                continue;
            }
            let longitude = parse_f64(parts[0]);
            let latitude = parse_f64(parts[1]);
            let altitude = parts.get(2).map(|s| parse_f64(s)).filter(|a| a.is_finite());
            self.push(build_point(latitude, longitude, altitude, None));
        }
    }

    fn push_track(&mut self, track: GxTrack) {
        if track.whens.len() != track.coords.len() {
            debug!(
                "[KmlParser] gx:Track has {} <when> and {} <gx:coord> entries",
                track.whens.len(),
                track.coords.len()
            );
        }
        for (i, coord) in track.coords.iter().enumerate() {
            let parts: Vec<&str> = coord.split_whitespace().collect();
            if parts.len() < 2 {
                self.skipped += 1;
                continue;
            }
            let longitude = parse_f64(parts[0]);
            let latitude = parse_f64(parts[1]);
            let altitude = parts.get(2).map(|s| parse_f64(s)).filter(|a| a.is_finite());
            let timestamp = track.whens.get(i).copied().flatten();
            self.push(build_point(latitude, longitude, altitude, timestamp));
        }
    }
}

fn parse_kml(bytes: &[u8]) -> Result<Vec<TrackPoint>> {
    let mut reader = xml_reader(bytes);
    let mut buf = Vec::new();
    let mut depth = ElementDepth::default();

    let mut state = KmlState { points: Vec::new(), skipped: 0 };
    let mut line_strings = 0usize;
    let mut track: Option<GxTrack> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth.open()?;
                match e.local_name().as_ref() {
                    b"LineString" => line_strings += 1,
                    b"Track" => track = Some(GxTrack::default()),
                    b"coordinates" if line_strings > 0 => field = Some(Field::Coordinates),
                    b"when" if track.is_some() => field = Some(Field::When),
                    b"coord" if track.is_some() => field = Some(Field::Coord),
                    _ => {}
                }
                text.clear();
            }
            Event::Empty(_) => depth.empty()?,
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
                match e.local_name().as_ref() {
                    b"LineString" => line_strings = line_strings.saturating_sub(1),
                    b"Track" => {
                        if let Some(t) = track.take() {
                            state.push_track(t);
                        }
                    }
                    _ => match field.take() {
                        Some(Field::Coordinates) => state.push_coordinates(&text),
                        Some(Field::When) => {
                            if let Some(t) = track.as_mut() {
                                t.whens.push(parse_time_text(&text));
                            }
                        }
                        Some(Field::Coord) => {
                            if let Some(t) = track.as_mut() {
                                t.coords.push(text.trim().to_string());
                            }
                        }
                        None => {}
                    },
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    depth.finish()?;

    if state.skipped > 0 {
        debug!("[KmlParser] Skipped {} points with invalid coordinates", state.skipped);
    }
    Ok(state.points)
}
