//! Per-file outcome reporting
//!
//! Reporters are called from whichever worker produced the outcome, so lines
//! from different batches interleave.

use std::io::Write;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::types::{FileOutcome, IgnoreReason, SyncOutcome, SyncSummary};

/// Sink for outcomes as they are produced
pub trait Reporter: Send + Sync {
    /// Called exactly once per outcome
    fn report(&self, outcome: &FileOutcome);

    /// Called once after every outcome has been reported
    fn finish(&self, _summary: &SyncSummary) {}
}

/// Output format for [`LineReporter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Writes one line per outcome to a shared writer
pub struct LineReporter<W: Write + Send> {
    out: Mutex<W>,
    bucket: String,
    format: ReportFormat,
}

impl LineReporter<std::io::Stdout> {
    pub fn stdout(bucket: &str, format: ReportFormat) -> Self {
        Self::new(std::io::stdout(), bucket, format)
    }
}

impl<W: Write + Send> LineReporter<W> {
    pub fn new(out: W, bucket: &str, format: ReportFormat) -> Self {
        Self {
            out: Mutex::new(out),
            bucket: bucket.to_string(),
            format,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write report line: {}", e);
        }
    }
}

impl<W: Write + Send> Reporter for LineReporter<W> {
    fn report(&self, outcome: &FileOutcome) {
        let line = match self.format {
            ReportFormat::Text => format_outcome(outcome, &self.bucket),
            ReportFormat::Json => match json_line(outcome) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Skipping report line for {}: {}", outcome.path.display(), e);
                    return;
                }
            },
        };
        self.write_line(&line);
    }

    fn finish(&self, summary: &SyncSummary) {
        let line = match self.format {
            ReportFormat::Text => format_summary(summary),
            ReportFormat::Json => match json_line(&serde_json::json!({ "summary": summary })) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Skipping summary line: {}", e);
                    return;
                }
            },
        };
        self.write_line(&line);
    }
}

/// One compact JSON document, for line-oriented output
pub fn json_line<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Human-readable line for one outcome
pub fn format_outcome(outcome: &FileOutcome, bucket: &str) -> String {
    let path = outcome.path.display();
    let key = outcome.key.as_deref().unwrap_or("?");
    match &outcome.outcome {
        SyncOutcome::Ignored {
            reason: IgnoreReason::Pattern,
        } => format!("{} matches an ignore pattern. Skipping.", path),
        SyncOutcome::Ignored {
            reason: IgnoreReason::BeforeCutoff,
        } => format!("{} not modified after cutoff. Skipping.", path),
        SyncOutcome::UnchangedSkip => format!(
            "{} already exists in s3://{}/{} with the same hash. Skipping upload.",
            path, bucket, key
        ),
        SyncOutcome::Uploaded { bytes } => {
            format!("{} uploaded to s3://{}/{} ({} bytes)", path, bucket, key, bytes)
        }
        SyncOutcome::Failed { reason } => format!("{} failed: {}", path, reason),
    }
}

pub fn format_summary(summary: &SyncSummary) -> String {
    format!(
        "{} files: {} uploaded ({} bytes), {} unchanged, {} ignored, {} failed",
        summary.total,
        summary.uploaded,
        summary.bytes_uploaded,
        summary.unchanged,
        summary.ignored,
        summary.failed
    )
}

/// Keeps every reported outcome in memory
#[derive(Default)]
pub struct CollectingReporter {
    outcomes: Mutex<Vec<FileOutcome>>,
    summary: Mutex<Option<SyncSummary>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes in the order they were reported
    pub fn outcomes(&self) -> Vec<FileOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn summary(&self) -> Option<SyncSummary> {
        self.summary.lock().clone()
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, outcome: &FileOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }

    fn finish(&self, summary: &SyncSummary) {
        *self.summary.lock() = Some(summary.clone());
    }
}
