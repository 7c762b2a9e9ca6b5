//! Photo geolocation extraction.
//!
//! Reads the EXIF GPS block and capture time from an image container (JPEG,
//! PNG, WebP, TIFF or HEIF) and classifies the photo:
//!
//! | Outcome | When |
//! |---------|------|
//! | [`PhotoClassification::Geolocated`] | latitude and longitude present and valid |
//! | [`PhotoClassification::Orphaned`] | no usable coordinates, valid capture time |
//! | [`PhotoClassification::Discarded`] | neither, or the metadata could not be read |
//!
//! A failed read is never an error for the caller; it is a discard with
//! [`DiscardReason::ExtractionFailed`].
//!
//! EXIF capture times carry no zone unless `OffsetTimeOriginal` is present;
//! without it the wall-clock time is taken as UTC.

use std::io::Cursor;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use exif::{In, Tag, Value};
use log::{debug, warn};

use crate::geo_utils::is_valid_coordinate;
use crate::validation::{sanitize_altitude, sanitize_timestamp};
use crate::{OrphanRecord, PointSource, TrackPoint};

/// Result of classifying one photo.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoClassification {
    Geolocated(TrackPoint),
    Orphaned(OrphanRecord),
    Discarded(DiscardReason),
}

/// Why a photo contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Metadata was readable but had neither usable coordinates nor a usable time
    NoUsableMetadata,
    /// The container or its EXIF block could not be read
    ExtractionFailed(String),
}

/// Raw geolocation fields read from a photo, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Extract and classify a photo's geolocation.
///
/// Borrows the bytes only for the duration of the call.
pub fn extract_photo(bytes: &[u8], file_name: &str) -> PhotoClassification {
    match read_photo_metadata(bytes) {
        Ok(metadata) => classify(metadata, file_name),
        Err(e) => {
            warn!("[PhotoExtractor] Error processing file {}: {}", file_name, e);
            PhotoClassification::Discarded(DiscardReason::ExtractionFailed(e.to_string()))
        }
    }
}

/// Read GPS and capture-time fields from an image container.
pub fn read_photo_metadata(bytes: &[u8]) -> Result<PhotoMetadata, exif::Error> {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        // A valid container without an EXIF block
        Err(exif::Error::NotFound(_)) => return Ok(PhotoMetadata::default()),
        Err(e) => return Err(e),
    };

    let mut metadata = PhotoMetadata {
        latitude: read_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S'),
        longitude: read_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W'),
        altitude: read_altitude(&exif),
        captured_at: None,
    };

    metadata.captured_at = [Tag::DateTimeOriginal, Tag::DateTime]
        .iter()
        .find_map(|tag| read_datetime(&exif, *tag));

    Ok(metadata)
}

/// Apply the coordinate, altitude and timestamp predicates.
pub fn classify(metadata: PhotoMetadata, file_name: &str) -> PhotoClassification {
    let captured_at = sanitize_timestamp(metadata.captured_at);

    if let (Some(latitude), Some(longitude)) = (metadata.latitude, metadata.longitude) {
        if is_valid_coordinate(latitude, longitude) {
            return PhotoClassification::Geolocated(TrackPoint {
                latitude,
                longitude,
                altitude: sanitize_altitude(metadata.altitude),
                timestamp: captured_at,
                distance_km: 0.0,
                source: PointSource::Photo,
                source_file: Some(file_name.to_string()),
            });
        }
        debug!(
            "[PhotoExtractor] {} has invalid coordinates ({}, {})",
            file_name, latitude, longitude
        );
    }

    match captured_at {
        Some(timestamp) => PhotoClassification::Orphaned(OrphanRecord::new(timestamp, file_name)),
        None => PhotoClassification::Discarded(DiscardReason::NoUsableMetadata),
    }
}

// ============================================================================
// EXIF field readers
// ============================================================================

/// Degrees/minutes/seconds rationals, negated when the reference matches
/// `negative_ref` (S or W).
fn read_coordinate(exif: &exif::Exif, tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let value = match &field.value {
        Value::Rational(r) if r.len() >= 3 => {
            r[0].to_f64() + r[1].to_f64() / 60.0 + r[2].to_f64() / 3600.0
        }
        Value::Rational(r) if !r.is_empty() => r[0].to_f64(),
        _ => return None,
    };

    let negative = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(v) => v.first().and_then(|s| s.first()).copied(),
            _ => None,
        })
        .is_some_and(|c| c.eq_ignore_ascii_case(&negative_ref));

    Some(if negative { -value } else { value })
}

/// Altitude in meters; reference byte 1 means below sea level.
fn read_altitude(exif: &exif::Exif) -> Option<f64> {
    let field = exif.get_field(Tag::GPSAltitude, In::PRIMARY)?;
    let altitude = match &field.value {
        Value::Rational(r) if !r.is_empty() => r[0].to_f64(),
        _ => return None,
    };

    let below_sea_level = exif
        .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Byte(b) => b.first().copied(),
            _ => None,
        })
        == Some(1);

    Some(if below_sea_level { -altitude } else { altitude })
}

fn read_datetime(exif: &exif::Exif, tag: Tag) -> Option<DateTime<Utc>> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(v) = &field.value else {
        return None;
    };
    let mut dt = exif::DateTime::from_ascii(v.first()?).ok()?;

    if tag == Tag::DateTimeOriginal {
        if let Some(Value::Ascii(offset)) = exif
            .get_field(Tag::OffsetTimeOriginal, In::PRIMARY)
            .map(|f| &f.value)
        {
            if let Some(raw) = offset.first() {
                let _ = dt.parse_offset(raw);
            }
        }
    }

    to_utc(&dt)
}

fn to_utc(dt: &exif::DateTime) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?
        .and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32)?;

    match dt.offset {
        Some(minutes) => FixedOffset::east_opt(i32::from(minutes) * 60)?
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc)),
        None => Some(naive.and_utc()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Minimal little-endian TIFF/EXIF blobs for tests.

    const BYTE: u16 = 1;
    const ASCII: u16 = 2;
    const LONG: u16 = 4;
    const RATIONAL: u16 = 5;
    const UNDEFINED: u16 = 7;

    struct Entry {
        tag: u16,
        kind: u16,
        count: u32,
        data: Vec<u8>,
    }

    fn ascii(tag: u16, s: &str) -> Entry {
        let mut data = s.as_bytes().to_vec();
        data.push(0);
        Entry { tag, kind: ASCII, count: data.len() as u32, data }
    }

    fn rationals(tag: u16, values: &[(u32, u32)]) -> Entry {
        let mut data = Vec::new();
        for (num, denom) in values {
            data.extend(num.to_le_bytes());
            data.extend(denom.to_le_bytes());
        }
        Entry { tag, kind: RATIONAL, count: values.len() as u32, data }
    }

    fn long(tag: u16, value: u32) -> Entry {
        Entry { tag, kind: LONG, count: 1, data: value.to_le_bytes().to_vec() }
    }

    fn degrees(value: f64) -> [(u32, u32); 3] {
        [((value * 1_000_000.0).round() as u32, 1_000_000), (0, 1), (0, 1)]
    }

    fn ifd_len(entries: &[Entry]) -> usize {
        let extra: usize = entries
            .iter()
            .filter(|e| e.data.len() > 4)
            .map(|e| (e.data.len() + 1) & !1)
            .sum();
        2 + entries.len() * 12 + 4 + extra
    }

    fn write_ifd(out: &mut Vec<u8>, entries: &[Entry]) {
        let extra_base = out.len() + 2 + entries.len() * 12 + 4;
        let mut extra = Vec::new();

        out.extend((entries.len() as u16).to_le_bytes());
        for e in entries {
            out.extend(e.tag.to_le_bytes());
            out.extend(e.kind.to_le_bytes());
            out.extend(e.count.to_le_bytes());
            if e.data.len() <= 4 {
                let mut inline = e.data.clone();
                inline.resize(4, 0);
                out.extend(inline);
            } else {
                out.extend(((extra_base + extra.len()) as u32).to_le_bytes());
                extra.extend(&e.data);
                if extra.len() % 2 == 1 {
                    extra.push(0);
                }
            }
        }
        out.extend(0u32.to_le_bytes());
        out.extend(extra);
    }

    /// Build a TIFF with an optional GPS block `(lat, lon, alt)` and an
    /// optional `DateTimeOriginal` ("YYYY:MM:DD HH:MM:SS").
    pub(crate) fn build_tiff(gps: Option<(f64, f64, Option<f64>)>, datetime: Option<&str>) -> Vec<u8> {
        let mut exif_ifd = vec![Entry { tag: 0x9000, kind: UNDEFINED, count: 4, data: b"0231".to_vec() }];
        if let Some(dt) = datetime {
            exif_ifd.push(ascii(0x9003, dt));
        }

        let mut gps_ifd = Vec::new();
        if let Some((lat, lon, alt)) = gps {
            gps_ifd.push(ascii(0x0001, if lat < 0.0 { "S" } else { "N" }));
            gps_ifd.push(rationals(0x0002, &degrees(lat.abs())));
            gps_ifd.push(ascii(0x0003, if lon < 0.0 { "W" } else { "E" }));
            gps_ifd.push(rationals(0x0004, &degrees(lon.abs())));
            if let Some(alt) = alt {
                gps_ifd.push(Entry { tag: 0x0005, kind: BYTE, count: 1, data: vec![u8::from(alt < 0.0)] });
                gps_ifd.push(rationals(0x0006, &[((alt.abs() * 100.0).round() as u32, 100)]));
            }
        }

        let mut ifd0 = vec![long(0x8769, 0)];
        if !gps_ifd.is_empty() {
            ifd0.push(long(0x8825, 0));
        }
        let exif_offset = 8 + ifd_len(&ifd0);
        let gps_offset = exif_offset + ifd_len(&exif_ifd);
        ifd0[0].data = (exif_offset as u32).to_le_bytes().to_vec();
        if !gps_ifd.is_empty() {
            ifd0[1].data = (gps_offset as u32).to_le_bytes().to_vec();
        }

        let mut out = b"II".to_vec();
        out.extend(42u16.to_le_bytes());
        out.extend(8u32.to_le_bytes());
        write_ifd(&mut out, &ifd0);
        write_ifd(&mut out, &exif_ifd);
        if !gps_ifd.is_empty() {
            write_ifd(&mut out, &gps_ifd);
        }
        out
    }
}
