//! Import track files and photos from disk and print the resulting set.
//!
//! ```text
//! cargo run --example import_track -- ride.gpx IMG_0001.jpg IMG_0002.jpg
//! ```

use std::path::Path;

use track_ingest::{
    IngestConfig, PhotoFile, ProcessMemorySampler, ProgressCallback, TrackFormat, TrackSet,
};

fn media_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = IngestConfig::default();
    let mut set = TrackSet::new();
    let mut photos = Vec::new();

    for arg in std::env::args().skip(1) {
        let path = Path::new(&arg);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&arg)
            .to_string();

        if TrackFormat::is_track_file(&name) {
            let bytes = std::fs::read(path)?;
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            match set.import_track(&bytes, ext, &config) {
                Ok((next, report)) => {
                    println!("{}: {} points, {} orphans placed", name, report.points_added, report.promoted);
                    set = next;
                }
                Err(e) => eprintln!("{}: {}", name, e),
            }
        } else {
            let size = std::fs::metadata(path)?.len();
            let owned = path.to_path_buf();
            photos.push(PhotoFile::deferred(name, media_type(path), size, move || std::fs::read(owned)));
        }
    }

    if !photos.is_empty() {
        let progress: ProgressCallback = std::sync::Arc::new(|done, total| {
            println!("  photos {}/{}", done, total);
        });
        let sampler = ProcessMemorySampler::new();
        let (next, report) = set.import_photos(photos, &config, &sampler, Some(progress), None)?;
        if report.no_usable_data() {
            println!("No usable GPS data in the selected photos");
        } else if report.stopped_early() {
            println!("Stopped early: memory ceiling reached");
        }
        set = next;
    }

    let summary = set.summary();
    println!(
        "{} track, {} photo, {} interpolated points; {} orphans pending",
        summary.track_points, summary.photo_points, summary.interpolated_points, summary.orphans
    );
    println!(
        "{:.2} km, gain {:.0} m, loss {:.0} m",
        summary.statistics.total_distance_km,
        summary.statistics.elevation_gain_m,
        summary.statistics.elevation_loss_m
    );
    if let Some(speed) = summary.statistics.average_speed_kmh {
        println!("average {:.1} km/h", speed);
    }

    println!("{}", serde_json::to_string_pretty(&set.points)?);
    Ok(())
}
