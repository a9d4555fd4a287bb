//! Core types for deltasync

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Default worker pool size
pub const DEFAULT_THREADS: usize = 8;

/// Default per-upload timeout in seconds
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;

/// User metadata key carrying the content digest on uploaded objects
pub const DIGEST_METADATA_KEY: &str = "hash";

/// Configuration for a sync run, built once and shared read-only
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the local tree to scan
    pub directory: PathBuf,
    /// Files modified at or before this boundary are never uploaded
    pub cutoff: CutoffDate,
    /// Destination bucket
    pub bucket: String,
    /// Destination key prefix
    pub prefix: String,
    /// Worker pool size
    pub threads: usize,
    /// Optional newline-delimited ignore-pattern file
    pub ignore_file: Option<PathBuf>,
    /// Bound on a single upload attempt
    pub upload_timeout: Duration,
    /// Extra attempts for transient upload failures
    pub max_retries: u32,
    /// Base delay for exponential retry backoff
    pub retry_base_delay: Duration,
}

impl SyncConfig {
    /// Create a config with default tuning knobs
    pub fn new(
        directory: impl Into<PathBuf>,
        cutoff: CutoffDate,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            cutoff,
            bucket: bucket.into(),
            prefix: prefix.into(),
            threads: DEFAULT_THREADS,
            ignore_file: None,
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
        }
    }

    /// Pre-flight checks. Canonicalizes the directory so walked paths are absolute.
    pub fn validate(mut self) -> Result<Self> {
        if self.bucket.trim().is_empty() {
            return Err(SyncError::Config("bucket must not be empty".to_string()));
        }
        if self.threads == 0 {
            return Err(SyncError::Config(
                "threads must be at least 1".to_string(),
            ));
        }

        let directory = std::fs::canonicalize(&self.directory).map_err(|e| {
            SyncError::Config(format!(
                "cannot read directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;
        if !directory.is_dir() {
            return Err(SyncError::Config(format!(
                "{} is not a directory",
                directory.display()
            )));
        }
        self.directory = directory;

        Ok(self)
    }
}

/// Date-only watermark. The boundary is local midnight at the start of the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffDate {
    boundary: DateTime<Utc>,
}

impl CutoffDate {
    /// Parse a `yyyy-mm-dd` date
    pub fn parse(input: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|source| {
            SyncError::InvalidDate {
                input: input.to_string(),
                source,
            }
        })?;
        Self::from_date(date)
    }

    /// Cutoff at local midnight of `date`
    pub fn from_date(date: NaiveDate) -> Result<Self> {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
            SyncError::Config(format!("{} has no midnight", date))
        })?;
        // Midnight can fall in a DST gap; the gap never exceeds an hour
        let local = Local
            .from_local_datetime(&midnight)
            .earliest()
            .or_else(|| {
                Local
                    .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                    .earliest()
            })
            .ok_or_else(|| {
                SyncError::Config(format!("local midnight of {} does not exist", date))
            })?;
        Ok(Self {
            boundary: local.with_timezone(&Utc),
        })
    }

    /// Cutoff at an exact instant
    pub fn at(boundary: DateTime<Utc>) -> Self {
        Self { boundary }
    }

    pub fn boundary(&self) -> DateTime<Utc> {
        self.boundary
    }

    /// True when a file modified at `modified` predates the watermark
    pub fn excludes(&self, modified: DateTime<Utc>) -> bool {
        modified <= self.boundary
    }
}

/// Local file metadata, read at decision time
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

impl LocalFile {
    /// Stat a file. A vanished file maps to `SyncError::NotFound`.
    pub fn stat(path: &Path) -> Result<Self> {
        let metadata =
            std::fs::metadata(path).map_err(|e| SyncError::from_file_io(path, e))?;
        let modified = metadata
            .modified()
            .map_err(|e| SyncError::from_file_io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            modified: DateTime::<Utc>::from(modified),
        })
    }
}

/// Snapshot of one remote object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectRecord {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    /// Lower-case hex digest with any quoting stripped
    pub digest: String,
}

/// Why a file was not considered for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Matched an ignore pattern
    Pattern,
    /// Modified at or before the cutoff date
    BeforeCutoff,
}

/// Per-file failure cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// File vanished between discovery and processing
    NotFound,
    /// Reading the file failed
    Read(String),
    /// The store rejected or failed the upload
    Upload(String),
    /// The upload exceeded the per-upload timeout
    Timeout,
    /// Anything else
    Other(String),
}

impl From<&SyncError> for FailureReason {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::NotFound(_) => FailureReason::NotFound,
            SyncError::Io(e) => FailureReason::Read(e.to_string()),
            SyncError::Upload { message, .. } => FailureReason::Upload(message.clone()),
            SyncError::Timeout(_) => FailureReason::Timeout,
            other => FailureReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "file not found"),
            FailureReason::Read(e) => write!(f, "read failed: {}", e),
            FailureReason::Upload(e) => write!(f, "upload failed: {}", e),
            FailureReason::Timeout => write!(f, "upload timed out"),
            FailureReason::Other(e) => write!(f, "{}", e),
        }
    }
}

/// Terminal classification of one file for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Ignored { reason: IgnoreReason },
    UnchangedSkip,
    Uploaded { bytes: u64 },
    Failed { reason: FailureReason },
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Ignored { .. } => "ignored",
            SyncOutcome::UnchangedSkip => "unchanged",
            SyncOutcome::Uploaded { .. } => "uploaded",
            SyncOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Outcome of one discovered file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    /// Destination key, once derived
    pub key: Option<String>,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Totals for a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: usize,
    pub ignored: usize,
    pub unchanged: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
}

impl SyncSummary {
    pub fn from_outcomes(outcomes: &[FileOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Default::default()
        };
        for item in outcomes {
            match &item.outcome {
                SyncOutcome::Ignored { .. } => summary.ignored += 1,
                SyncOutcome::UnchangedSkip => summary.unchanged += 1,
                SyncOutcome::Uploaded { bytes } => {
                    summary.uploaded += 1;
                    summary.bytes_uploaded += bytes;
                }
                SyncOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
