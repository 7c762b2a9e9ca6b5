//! The caller-owned collection of points and outstanding orphans.
//!
//! Every operation takes the current snapshot and returns the next one; no
//! component keeps a reference to it. After each ingestion event the set is
//! re-assembled (sorted, distances recomputed) and pending orphans are
//! reconciled against the track.

use serde::{Deserialize, Serialize};

use crate::assembler::assemble;
use crate::batch::{process_batch, BatchStats, BatchStatus, CancelFlag, PhotoFile, ProgressCallback};
use crate::config::IngestConfig;
use crate::error::Result;
use crate::memory::MemorySampler;
use crate::parsers::parse_track;
use crate::stats::TrackStatistics;
use crate::sync::reconcile;
use crate::{OrphanRecord, PointSource, TrackPoint};

/// Ordered points plus photos still waiting for a position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSet {
    pub points: Vec<TrackPoint>,
    pub orphans: Vec<OrphanRecord>,
}

/// What one ingestion event changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Points added directly from the imported data
    pub points_added: usize,
    /// New orphans found in the imported photos
    pub orphans_added: usize,
    /// Orphans placed onto the track during this event
    pub promoted: usize,
    /// Orphans still pending afterwards
    pub still_orphaned: usize,
    /// Batch counters, for photo imports
    pub batch: Option<BatchStats>,
    pub status: BatchStatus,
}

impl IngestReport {
    fn new(points_added: usize) -> Self {
        Self {
            points_added,
            orphans_added: 0,
            promoted: 0,
            still_orphaned: 0,
            batch: None,
            status: BatchStatus::Completed,
        }
    }

    /// The import produced neither points nor orphans.
    pub fn no_usable_data(&self) -> bool {
        self.points_added == 0 && self.orphans_added == 0
    }

    /// The batch was cut short by the memory ceiling.
    pub fn stopped_early(&self) -> bool {
        self.status == BatchStatus::StoppedLowMemory
    }
}

/// Counts by provenance plus track statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub track_points: usize,
    pub photo_points: usize,
    pub interpolated_points: usize,
    pub orphans: usize,
    pub statistics: TrackStatistics,
}

impl TrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add already-parsed track points and re-assemble.
    pub fn with_track_points(mut self, points: Vec<TrackPoint>) -> Self {
        self.points = assemble(std::mem::take(&mut self.points), points);
        self
    }

    /// Number of photos already represented, as points or orphans.
    pub fn photo_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.source != PointSource::Track)
            .count()
            + self.orphans.len()
    }

    /// Parse a track file into the set, then reconcile pending orphans.
    ///
    /// A parse failure leaves the caller's snapshot untouched.
    pub fn import_track(&self, bytes: &[u8], extension: &str, config: &IngestConfig) -> Result<(Self, IngestReport)> {
        let parsed = parse_track(bytes, extension)?;
        let mut report = IngestReport::new(parsed.len());

        let next = Self {
            points: assemble(self.points.clone(), parsed),
            orphans: self.orphans.clone(),
        };
        let next = next.reconcile_into(config, &mut report);
        Ok((next, report))
    }

    /// Run a photo batch into the set, then reconcile pending orphans.
    ///
    /// Photos already in the set count against `max_total_files`.
    pub fn import_photos(
        &self,
        files: Vec<PhotoFile>,
        config: &IngestConfig,
        sampler: &dyn MemorySampler,
        progress: Option<ProgressCallback>,
        cancel: Option<&CancelFlag>,
    ) -> Result<(Self, IngestReport)> {
        let outcome = process_batch(files, self.photo_count(), config, sampler, progress, cancel)?;

        let mut report = IngestReport::new(outcome.points.len());
        report.orphans_added = outcome.orphans.len();
        report.batch = Some(outcome.stats);
        report.status = outcome.status;

        let mut orphans = self.orphans.clone();
        orphans.extend(outcome.orphans);
        let next = Self {
            points: assemble(self.points.clone(), outcome.points),
            orphans,
        };
        let next = next.reconcile_into(config, &mut report);
        Ok((next, report))
    }

    /// Reconcile pending orphans against the current track.
    pub fn synchronize(&self, config: &IngestConfig) -> (Self, IngestReport) {
        let mut report = IngestReport::new(0);
        let next = self.clone().reconcile_into(config, &mut report);
        (next, report)
    }

    /// Drop every point and orphan.
    pub fn clear(self) -> Self {
        Self::default()
    }

    pub fn summary(&self) -> TrackSummary {
        let count = |source: PointSource| self.points.iter().filter(|p| p.source == source).count();
        TrackSummary {
            track_points: count(PointSource::Track),
            photo_points: count(PointSource::Photo),
            interpolated_points: count(PointSource::Interpolated),
            orphans: self.orphans.len(),
            statistics: TrackStatistics::from_points(&self.points),
        }
    }

    fn reconcile_into(self, config: &IngestConfig, report: &mut IngestReport) -> Self {
        if self.orphans.is_empty() {
            return self;
        }
        let result = reconcile(&self.orphans, &self.points, config.orphan_tolerance());
        report.promoted = result.promoted.len();
        report.still_orphaned = result.still_orphaned.len();

        Self {
            points: assemble(self.points, result.promoted),
            orphans: result.still_orphaned,
        }
    }
}
