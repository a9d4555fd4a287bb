//! Incremental one-way sync engine
//!
//! A run is: load ignore patterns, snapshot the remote index, walk the local
//! tree, then decide and upload every file across a bounded worker pool.
//! Config, ignore-file and listing errors abort before any file is touched.

pub mod decision;
pub mod index;
pub mod retry;
pub mod scheduler;

pub use decision::{compute_digest, decide, destination_key, Decision, DecisionContext, UploadReason};
pub use index::RemoteIndex;
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{partition, SyncScheduler};

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::ignore::IgnoreMatcher;
use crate::report::Reporter;
use crate::store::ObjectStore;
use crate::types::{FailureReason, FileOutcome, SyncConfig, SyncOutcome, SyncSummary};
use crate::walk::discover_files;

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// One outcome per discovered file, in walk order, followed by one
    /// `Failed` outcome per directory that could not be listed
    pub outcomes: Vec<FileOutcome>,
    pub summary: SyncSummary,
}

/// Run a full sync. Returns `Err` only for fatal errors; per-file failures
/// are inside the report.
pub async fn run_sync(
    config: &SyncConfig,
    store: Arc<dyn ObjectStore>,
    reporter: Arc<dyn Reporter>,
) -> Result<SyncReport> {
    let started_at = Utc::now();
    let config = config.clone().validate()?;
    let ignore = IgnoreMatcher::load(config.ignore_file.as_deref())?;

    let index = RemoteIndex::build(store.as_ref(), &config.bucket, &config.prefix).await?;

    let root = config.directory.clone();
    let discovery = tokio::task::spawn_blocking(move || discover_files(&root))
        .await
        .map_err(|e| SyncError::Internal(format!("directory walk failed: {}", e)))??;
    tracing::info!(
        "Found {} files under {} (cutoff {})",
        discovery.files.len(),
        config.directory.display(),
        config.cutoff.boundary()
    );

    let ctx = Arc::new(DecisionContext::new(&config, ignore, index));
    let scheduler = SyncScheduler::new(&config, ctx, store, reporter.clone());
    let mut outcomes = scheduler.run(discovery.files).await?;

    for (path, error) in discovery.unreadable {
        let outcome = FileOutcome {
            path,
            key: None,
            outcome: SyncOutcome::Failed {
                reason: FailureReason::Read(error),
            },
        };
        reporter.report(&outcome);
        outcomes.push(outcome);
    }

    let summary = SyncSummary::from_outcomes(&outcomes);
    reporter.finish(&summary);

    let completed_at = Utc::now();
    tracing::info!(
        "Sync completed in {}ms: {} uploaded, {} unchanged, {} ignored, {} failed",
        (completed_at - started_at).num_milliseconds(),
        summary.uploaded,
        summary.unchanged,
        summary.ignored,
        summary.failed
    );

    Ok(SyncReport {
        started_at,
        completed_at,
        outcomes,
        summary,
    })
}
