//! Chunked, memory-bounded photo batch processing.
//!
//! Files are pre-validated against the configured size, media type and
//! extension allow-lists, then extracted chunk by chunk. Between chunks the
//! memory sampler is read; over the ceiling, the remaining chunks are skipped
//! and everything accumulated so far is still returned.
//!
//! [`BatchJob`] exposes the loop one chunk at a time for callers that drive
//! their own scheduling; [`process_batch`] runs it to completion.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::memory::MemorySampler;
use crate::photo::{extract_photo, DiscardReason, PhotoClassification};
use crate::validation::check_photo_file;
use crate::{OrphanRecord, TrackPoint};

/// Progress callback, called with (processed, total) after every chunk.
pub type ProgressCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Caller-side cancellation, observed between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deferred reader for a photo's contents, called at most once.
pub type ByteSource = Box<dyn FnOnce() -> io::Result<Vec<u8>> + Send>;

enum PhotoBytes {
    Loaded(Vec<u8>),
    Deferred(ByteSource),
}

/// One photo as supplied by the caller.
///
/// Size, media type and extension checks run against the declared values;
/// contents are only read for files that pass them, one chunk at a time.
pub struct PhotoFile {
    pub name: String,
    /// Declared media type, e.g. `image/jpeg`
    pub media_type: String,
    size: u64,
    bytes: PhotoBytes,
}

impl PhotoFile {
    /// A photo whose contents are already in memory.
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size: bytes.len() as u64,
            bytes: PhotoBytes::Loaded(bytes),
        }
    }

    /// A photo read on demand, e.g. from disk.
    pub fn deferred(
        name: impl Into<String>,
        media_type: impl Into<String>,
        size: u64,
        source: impl FnOnce() -> io::Result<Vec<u8>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size,
            bytes: PhotoBytes::Deferred(Box::new(source)),
        }
    }

    /// Declared size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn read(self) -> (String, io::Result<Vec<u8>>) {
        let bytes = match self.bytes {
            PhotoBytes::Loaded(bytes) => Ok(bytes),
            PhotoBytes::Deferred(source) => source(),
        };
        (self.name, bytes)
    }
}

impl fmt::Debug for PhotoFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoFile")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.size)
            .field("loaded", &matches!(self.bytes, PhotoBytes::Loaded(_)))
            .finish()
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every chunk was processed
    Completed,
    /// Memory usage crossed the ceiling; later chunks were skipped
    StoppedLowMemory,
    /// The caller cancelled; later chunks were skipped
    Cancelled,
}

/// Per-batch counters for caller-side reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Files supplied
    pub total: usize,
    /// Files in chunks that were processed, rejected ones included
    pub processed: usize,
    /// Failed size, media type or extension checks
    pub rejected: usize,
    /// Readable but without usable coordinates or time
    pub discarded: usize,
    /// Metadata could not be read
    pub failed: usize,
    pub geolocated: usize,
    pub orphaned: usize,
}

/// Accumulated results of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub points: Vec<TrackPoint>,
    pub orphans: Vec<OrphanRecord>,
    pub stats: BatchStats,
    pub status: BatchStatus,
}

impl BatchOutcome {
    /// True when no photo produced a point or an orphan.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.orphans.is_empty()
    }
}

/// Reported after each processed chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    /// Zero-based index of the chunk just processed
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub processed: usize,
    pub total: usize,
    /// Memory reading taken after the chunk, if available
    pub memory_mb: Option<f64>,
}

/// Incremental batch state. Lives only for one batch call.
pub struct BatchJob {
    config: IngestConfig,
    chunks: VecDeque<Vec<PhotoFile>>,
    chunk_count: usize,
    next_chunk: usize,
    points: Vec<TrackPoint>,
    orphans: Vec<OrphanRecord>,
    stats: BatchStats,
    status: Option<BatchStatus>,
}

impl BatchJob {
    /// Check batch-level limits and partition `files` into chunks.
    ///
    /// `existing_count` is the number of photos already ingested in the
    /// caller's session, counted against `max_total_files`.
    pub fn new(files: Vec<PhotoFile>, existing_count: usize, config: &IngestConfig) -> Result<Self> {
        config.validate()?;

        if files.is_empty() {
            return Err(IngestError::EmptyBatch);
        }
        if files.len() > config.max_batch_files {
            return Err(IngestError::BatchTooLarge {
                count: files.len(),
                max: config.max_batch_files,
            });
        }
        let total = existing_count.saturating_add(files.len());
        if total > config.max_total_files {
            return Err(IngestError::TotalLimitExceeded { total, max: config.max_total_files });
        }

        let file_count = files.len();
        let mut chunks = VecDeque::with_capacity(file_count.div_ceil(config.chunk_size));
        let mut iter = files.into_iter();
        loop {
            let chunk: Vec<PhotoFile> = iter.by_ref().take(config.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push_back(chunk);
        }

        info!(
            "[BatchProcessor] Processing {} files in {} chunks of {}",
            file_count,
            chunks.len(),
            config.chunk_size
        );

        Ok(Self {
            config: config.clone(),
            chunk_count: chunks.len(),
            chunks,
            next_chunk: 0,
            points: Vec::new(),
            orphans: Vec::new(),
            stats: BatchStats { total: file_count, ..Default::default() },
            status: None,
        })
    }

    /// Process the next chunk.
    ///
    /// Returns `None` once the job has finished, whether by completing,
    /// hitting the memory ceiling or being cancelled.
    pub fn step(&mut self, sampler: &dyn MemorySampler, cancel: Option<&CancelFlag>) -> Option<ChunkProgress> {
        if self.status.is_some() {
            return None;
        }
        if is_cancelled(cancel) {
            self.stop(BatchStatus::Cancelled);
            return None;
        }
        let Some(chunk) = self.chunks.pop_front() else {
            self.status = Some(BatchStatus::Completed);
            return None;
        };

        let chunk_len = chunk.len();
        let (accepted, rejected) = self.filter_chunk(chunk);
        let results = extract_chunk(accepted);

        // A chunk is merged whole or not at all
        if is_cancelled(cancel) {
            self.stop(BatchStatus::Cancelled);
            return None;
        }

        self.stats.rejected += rejected;
        self.merge(results);
        self.stats.processed += chunk_len;

        let chunk_index = self.next_chunk;
        self.next_chunk += 1;

        let memory_mb = sampler.used_mb();
        debug!(
            "[BatchProcessor] Chunk {}/{} done, {}/{} files, memory {:?} MB",
            chunk_index + 1,
            self.chunk_count,
            self.stats.processed,
            self.stats.total,
            memory_mb
        );

        if self.chunks.is_empty() {
            self.status = Some(BatchStatus::Completed);
        } else if let Some(used) = memory_mb.filter(|used| *used > self.config.memory_ceiling_mb) {
            warn!(
                "[BatchProcessor] Memory usage {:.0} MB exceeds ceiling {:.0} MB, stopping early",
                used, self.config.memory_ceiling_mb
            );
            self.stop(BatchStatus::StoppedLowMemory);
        }

        Some(ChunkProgress {
            chunk_index,
            chunk_count: self.chunk_count,
            processed: self.stats.processed,
            total: self.stats.total,
            memory_mb,
        })
    }

    pub fn status(&self) -> Option<BatchStatus> {
        self.status
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Consume the job and return what was accumulated. A job finished
    /// before its chunks ran out counts as cancelled.
    pub fn finish(self) -> BatchOutcome {
        let status = self.status.unwrap_or(if self.chunks.is_empty() {
            BatchStatus::Completed
        } else {
            BatchStatus::Cancelled
        });

        info!(
            "[BatchProcessor] {:?}: {} geolocated, {} orphaned, {} discarded, {} failed, {} rejected",
            status,
            self.stats.geolocated,
            self.stats.orphaned,
            self.stats.discarded,
            self.stats.failed,
            self.stats.rejected
        );

        BatchOutcome {
            points: self.points,
            orphans: self.orphans,
            stats: self.stats,
            status,
        }
    }

    fn stop(&mut self, status: BatchStatus) {
        if status == BatchStatus::Cancelled {
            info!("[BatchProcessor] Cancelled after {} of {} chunks", self.next_chunk, self.chunk_count);
        }
        self.chunks.clear();
        self.status = Some(status);
    }

    fn filter_chunk(&self, chunk: Vec<PhotoFile>) -> (Vec<PhotoFile>, usize) {
        let mut rejected = 0;
        let accepted = chunk
            .into_iter()
            .filter(|file| {
                match check_photo_file(&file.name, &file.media_type, file.size(), &self.config) {
                    Ok(()) => true,
                    Err(reason) => {
                        debug!("[BatchProcessor] Rejected {}: {:?}", file.name, reason);
                        rejected += 1;
                        false
                    }
                }
            })
            .collect();
        (accepted, rejected)
    }

    fn merge(&mut self, results: Vec<PhotoClassification>) {
        for result in results {
            match result {
                PhotoClassification::Geolocated(point) => {
                    self.stats.geolocated += 1;
                    self.points.push(point);
                }
                PhotoClassification::Orphaned(orphan) => {
                    self.stats.orphaned += 1;
                    self.orphans.push(orphan);
                }
                PhotoClassification::Discarded(DiscardReason::NoUsableMetadata) => {
                    self.stats.discarded += 1;
                }
                PhotoClassification::Discarded(DiscardReason::ExtractionFailed(_)) => {
                    self.stats.failed += 1;
                }
            }
        }
    }
}

fn is_cancelled(cancel: Option<&CancelFlag>) -> bool {
    cancel.is_some_and(CancelFlag::is_cancelled)
}

fn load_and_extract(file: PhotoFile) -> PhotoClassification {
    match file.read() {
        (name, Ok(bytes)) => extract_photo(&bytes, &name),
        (name, Err(e)) => {
            warn!("[BatchProcessor] Could not read {}: {}", name, e);
            PhotoClassification::Discarded(DiscardReason::ExtractionFailed(e.to_string()))
        }
    }
}

/// Read and extract every file of a chunk. Results keep input order.
#[cfg(feature = "parallel")]
fn extract_chunk(files: Vec<PhotoFile>) -> Vec<PhotoClassification> {
    use rayon::prelude::*;

    files.into_par_iter().map(load_and_extract).collect()
}

#[cfg(not(feature = "parallel"))]
fn extract_chunk(files: Vec<PhotoFile>) -> Vec<PhotoClassification> {
    files.into_iter().map(load_and_extract).collect()
}

/// Run a batch to completion.
///
/// Calls `progress` after every chunk and yields the thread between chunks.
/// Per-file failures and early stops are reported in the outcome; only
/// structurally invalid calls return an error.
pub fn process_batch(
    files: Vec<PhotoFile>,
    existing_count: usize,
    config: &IngestConfig,
    sampler: &dyn MemorySampler,
    progress: Option<ProgressCallback>,
    cancel: Option<&CancelFlag>,
) -> Result<BatchOutcome> {
    let mut job = BatchJob::new(files, existing_count, config)?;

    while let Some(step) = job.step(sampler, cancel) {
        if let Some(ref callback) = progress {
            callback(step.processed as u32, step.total as u32);
        }
        std::thread::yield_now();
    }

    Ok(job.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FixedMemorySampler;
    use crate::photo::test_support::build_tiff;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn padded(mut bytes: Vec<u8>) -> Vec<u8> {
        bytes.resize(2048, 0);
        bytes
    }

    fn geotagged(i: usize) -> PhotoFile {
        let lat = 10.0 + i as f64 * 0.001;
        let bytes = build_tiff(Some((lat, 10.0, Some(100.0))), Some("2023:06:15 10:30:00"));
        PhotoFile::new(format!("IMG_{:04}.jpg", i), "image/jpeg", padded(bytes))
    }

    fn orphan(name: &str) -> PhotoFile {
        PhotoFile::new(name, "image/jpeg", padded(build_tiff(None, Some("2023:06:15 10:30:00"))))
    }

    #[test]
    fn test_all_chunks_processed() {
        let files: Vec<PhotoFile> = (0..120).map(geotagged).collect();
        let outcome = process_batch(files, 0, &IngestConfig::default(), &FixedMemorySampler(Some(10.0)), None, None).unwrap();

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.points.len(), 120);
        assert_eq!(outcome.stats.processed, 120);
        assert_eq!(outcome.stats.geolocated, 120);
    }

    #[test]
    fn test_memory_ceiling_stops_remaining_chunks() {
        let files: Vec<PhotoFile> = (0..120).map(geotagged).collect();
        let calls = AtomicUsize::new(0);
        let sampler = || {
            // Under the ceiling after chunk 1, over it after chunk 2
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Some(100.0)
            } else {
                Some(600.0)
            }
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let progress: ProgressCallback = Arc::new(move |done, total| {
            seen_cb.lock().unwrap().push((done, total));
        });

        let outcome = process_batch(files, 0, &IngestConfig::default(), &sampler, Some(progress), None).unwrap();

        assert_eq!(outcome.status, BatchStatus::StoppedLowMemory);
        assert_eq!(outcome.points.len(), 100);
        assert_eq!(outcome.stats.processed, 100);
        assert_eq!(outcome.stats.total, 120);
        assert_eq!(*seen.lock().unwrap(), vec![(50, 120), (100, 120)]);
        // Chunk 3 would have produced latitude 10.1 and above
        assert!(outcome.points.iter().all(|p| p.latitude < 10.1 - 1e-9));
    }

    #[test]
    fn test_skipped_chunks_are_never_read() {
        let reads = Arc::new(AtomicUsize::new(0));
        let files: Vec<PhotoFile> = (0..120)
            .map(|i| {
                let reads = reads.clone();
                let file = geotagged(i);
                let (name, bytes) = file.read();
                let bytes = bytes.unwrap();
                PhotoFile::deferred(name, "image/jpeg", bytes.len() as u64, move || {
                    reads.fetch_add(1, Ordering::SeqCst);
                    Ok(bytes)
                })
            })
            .collect();
        let calls = AtomicUsize::new(0);
        let sampler = || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Some(100.0)
            } else {
                Some(600.0)
            }
        };

        let outcome = process_batch(files, 0, &IngestConfig::default(), &sampler, None, None).unwrap();

        assert_eq!(outcome.status, BatchStatus::StoppedLowMemory);
        assert_eq!(outcome.points.len(), 100);
        assert_eq!(reads.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_rejected_files_are_never_read() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let oversized = PhotoFile::deferred("huge.jpg", "image/jpeg", 500 * 1024 * 1024, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });

        let outcome = process_batch(vec![oversized], 0, &IngestConfig::default(), &FixedMemorySampler(None), None, None).unwrap();

        assert_eq!(outcome.stats.rejected, 1);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_read_error_counts_as_failed() {
        let unreadable = PhotoFile::deferred("gone.jpg", "image/jpeg", 4096, || {
            Err(io::Error::new(io::ErrorKind::NotFound, "file vanished"))
        });
        let files = vec![unreadable, geotagged(0)];

        let outcome = process_batch(files, 0, &IngestConfig::default(), &FixedMemorySampler(None), None, None).unwrap();

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.geolocated, 1);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_extraction_keeps_input_order() {
        let config = IngestConfig { chunk_size: 200, ..Default::default() };
        let files: Vec<PhotoFile> = (0..200).map(geotagged).collect();

        let outcome = process_batch(files, 0, &config, &FixedMemorySampler(None), None, None).unwrap();

        assert_eq!(outcome.points.len(), 200);
        for (i, point) in outcome.points.iter().enumerate() {
            let expected = 10.0 + i as f64 * 0.001;
            assert!((point.latitude - expected).abs() < 1e-6, "point {} out of order", i);
            assert_eq!(point.source_file.as_deref(), Some(format!("IMG_{:04}.jpg", i).as_str()));
        }
    }

    #[test]
    fn test_ceiling_after_last_chunk_still_completes() {
        let files: Vec<PhotoFile> = (0..10).map(geotagged).collect();
        let outcome = process_batch(files, 0, &IngestConfig::default(), &FixedMemorySampler(Some(9_999.0)), None, None).unwrap();
        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.points.len(), 10);
    }

    #[test]
    fn test_unknown_memory_never_stops() {
        let files: Vec<PhotoFile> = (0..60).map(geotagged).collect();
        let outcome = process_batch(files, 0, &IngestConfig::default(), &FixedMemorySampler(None), None, None).unwrap();
        assert_eq!(outcome.status, BatchStatus::Completed);
    }

    #[test]
    fn test_cancel_between_chunks() {
        let files: Vec<PhotoFile> = (0..120).map(geotagged).collect();
        let cancel = CancelFlag::new();
        let cancel_cb = cancel.clone();
        let progress: ProgressCallback = Arc::new(move |_, _| cancel_cb.cancel());

        let outcome = process_batch(
            files,
            0,
            &IngestConfig::default(),
            &FixedMemorySampler(None),
            Some(progress),
            Some(&cancel),
        )
        .unwrap();

        assert_eq!(outcome.status, BatchStatus::Cancelled);
        assert_eq!(outcome.points.len(), 50);
        assert_eq!(outcome.stats.processed, 50);
    }

    #[test]
    fn test_step_by_step() {
        let files: Vec<PhotoFile> = (0..120).map(geotagged).collect();
        let config = IngestConfig::default();
        let mut job = BatchJob::new(files, 0, &config).unwrap();
        let sampler = FixedMemorySampler(None);

        let sizes: Vec<usize> = std::iter::from_fn(|| job.step(&sampler, None))
            .map(|p| p.processed)
            .collect();
        assert_eq!(sizes, vec![50, 100, 120]);
        assert_eq!(job.status(), Some(BatchStatus::Completed));
        assert!(job.step(&sampler, None).is_none());
    }

    #[test]
    fn test_rejections_and_classifications_are_counted() {
        let files = vec![
            PhotoFile::new("tiny.jpg", "image/jpeg", vec![0; 100]),
            PhotoFile::new("anim.jpg", "image/gif", vec![0; 2048]),
            PhotoFile::new("anim.gif", "image/jpeg", vec![0; 2048]),
            PhotoFile::new("corrupt.jpg", "image/jpeg", vec![0x42; 2048]),
            PhotoFile::new("blank.jpg", "image/jpeg", padded(build_tiff(None, None))),
            orphan("IMG_ORPHAN.jpg"),
            geotagged(1),
        ];
        let outcome = process_batch(files, 0, &IngestConfig::default(), &FixedMemorySampler(None), None, None).unwrap();

        assert_eq!(
            outcome.stats,
            BatchStats {
                total: 7,
                processed: 7,
                rejected: 3,
                discarded: 1,
                failed: 1,
                geolocated: 1,
                orphaned: 1,
            }
        );
        assert_eq!(outcome.orphans[0].source_file, "IMG_ORPHAN.jpg");
        assert!(!outcome.is_empty());
    }

    #[test]
    fn test_batch_limits() {
        let config = IngestConfig { max_batch_files: 3, max_total_files: 5, ..Default::default() };

        assert!(matches!(BatchJob::new(Vec::new(), 0, &config), Err(IngestError::EmptyBatch)));

        let four: Vec<PhotoFile> = (0..4).map(geotagged).collect();
        assert_eq!(
            BatchJob::new(four, 0, &config).err(),
            Some(IngestError::BatchTooLarge { count: 4, max: 3 })
        );

        let three: Vec<PhotoFile> = (0..3).map(geotagged).collect();
        assert_eq!(
            BatchJob::new(three, 3, &config).err(),
            Some(IngestError::TotalLimitExceeded { total: 6, max: 5 })
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = IngestConfig { chunk_size: 0, ..Default::default() };
        assert!(matches!(
            BatchJob::new(vec![geotagged(0)], 0, &config),
            Err(IngestError::InvalidArgument(_))
        ));
    }
}
