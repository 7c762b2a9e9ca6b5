//! Ingestion configuration.

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Configuration for photo batches and track synchronization.
///
/// Every field has a default; a partially specified serialized config is
/// completed from [`IngestConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Files per extraction chunk.
    /// Default: 50
    pub chunk_size: usize,

    /// Process memory (MB) above which remaining chunks are skipped.
    /// Default: 500.0
    pub memory_ceiling_mb: f64,

    /// Maximum files accepted in one batch call.
    /// Default: 10,000
    pub max_batch_files: usize,

    /// Maximum files across existing points and the new batch.
    /// Default: 50,000
    pub max_total_files: usize,

    /// Smallest accepted photo, in bytes.
    /// Default: 1024 (1KB)
    pub min_file_size_bytes: u64,

    /// Largest accepted photo, in bytes.
    /// Default: 100 MiB
    pub max_file_size_bytes: u64,

    /// Accepted declared media types (compared case-insensitively).
    /// Default: image/jpeg, image/jpg, image/png, image/webp
    pub allowed_media_types: Vec<String>,

    /// Accepted file name suffixes (compared case-insensitively).
    /// Default: .jpg, .jpeg, .png, .webp
    pub allowed_extensions: Vec<String>,

    /// Window in which an orphan before the first or after the last track
    /// point is snapped to that point. The gap must be strictly smaller.
    /// Default: 300 seconds
    pub orphan_match_tolerance_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            memory_ceiling_mb: 500.0,
            max_batch_files: 10_000,
            max_total_files: 50_000,
            min_file_size_bytes: 1024,
            max_file_size_bytes: 100 * 1024 * 1024,
            allowed_media_types: ["image/jpeg", "image/jpg", "image/png", "image/webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_extensions: [".jpg", ".jpeg", ".png", ".webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            orphan_match_tolerance_secs: 300,
        }
    }
}

impl IngestConfig {
    /// Reject settings no batch could run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidArgument("chunk_size must be at least 1".into()));
        }
        if !(self.memory_ceiling_mb > 0.0) {
            return Err(IngestError::InvalidArgument(format!(
                "memory_ceiling_mb must be positive, got {}",
                self.memory_ceiling_mb
            )));
        }
        if self.max_batch_files == 0 || self.max_total_files == 0 {
            return Err(IngestError::InvalidArgument("file ceilings must be at least 1".into()));
        }
        if self.min_file_size_bytes > self.max_file_size_bytes {
            return Err(IngestError::InvalidArgument(format!(
                "min_file_size_bytes ({}) exceeds max_file_size_bytes ({})",
                self.min_file_size_bytes, self.max_file_size_bytes
            )));
        }
        if self.allowed_media_types.is_empty() || self.allowed_extensions.is_empty() {
            return Err(IngestError::InvalidArgument("allow-lists must not be empty".into()));
        }
        if self.orphan_match_tolerance_secs < 0 {
            return Err(IngestError::InvalidArgument(
                "orphan_match_tolerance_secs must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Tolerance window as a chrono duration.
    pub fn orphan_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.orphan_match_tolerance_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.max_file_size_bytes, 104_857_600);
        assert_eq!(config.orphan_tolerance(), chrono::Duration::minutes(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: IngestConfig = serde_json::from_str(r#"{"chunk_size": 10}"#).unwrap();
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.max_batch_files, 10_000);
        assert_eq!(config.allowed_extensions.len(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = IngestConfig { chunk_size: 0, ..IngestConfig::default() };
        assert!(matches!(config.validate(), Err(IngestError::InvalidArgument(_))));

        let config = IngestConfig {
            min_file_size_bytes: 10,
            max_file_size_bytes: 5,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());

        let config = IngestConfig { memory_ceiling_mb: f64::NAN, ..IngestConfig::default() };
        assert!(config.validate().is_err());
    }
}
