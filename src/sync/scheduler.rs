//! Batch scheduler: bounded-parallelism decision + upload over the file list

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use super::decision::{compute_digest, decide, Decision, DecisionContext, UploadReason};
use super::retry::RetryPolicy;
use crate::error::{Result, SyncError};
use crate::report::Reporter;
use crate::store::ObjectStore;
use crate::types::{FailureReason, FileOutcome, SyncConfig, SyncOutcome, DIGEST_METADATA_KEY};

/// Split `items` into at most `parallelism` contiguous batches of
/// `ceil(len / parallelism)` items; the last batch may be shorter.
///
/// An empty input yields no batches, and a parallelism of zero is treated
/// as one.
pub fn partition<T>(items: Vec<T>, parallelism: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let parallelism = parallelism.max(1);
    let batch_size = items.len().div_ceil(parallelism);
    let mut batches = Vec::with_capacity(parallelism.min(items.len()));

    let mut iter = items.into_iter();
    loop {
        let batch: Vec<T> = iter.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }
        batches.push(batch);
    }

    batches
}

/// Drives one worker per batch. Files within a batch run sequentially in
/// walk order; batches run concurrently.
#[derive(Clone)]
pub struct SyncScheduler {
    ctx: Arc<DecisionContext>,
    store: Arc<dyn ObjectStore>,
    reporter: Arc<dyn Reporter>,
    bucket: String,
    parallelism: usize,
    retry: RetryPolicy,
}

impl SyncScheduler {
    pub fn new(
        config: &SyncConfig,
        ctx: Arc<DecisionContext>,
        store: Arc<dyn ObjectStore>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            ctx,
            store,
            reporter,
            bucket: config.bucket.clone(),
            parallelism: config.threads.max(1),
            retry: RetryPolicy::new(
                config.max_retries,
                config.upload_timeout,
                config.retry_base_delay,
            ),
        }
    }

    /// Process every file and return one outcome per file, in input order.
    ///
    /// Per-file failures become `Failed` outcomes and never stop sibling
    /// work. Only a crashed worker aborts the run.
    pub async fn run(&self, files: Vec<PathBuf>) -> Result<Vec<FileOutcome>> {
        let total = files.len();
        let batches = partition(files, self.parallelism);
        tracing::info!(
            "Processing {} files in {} batches ({} workers)",
            total,
            batches.len(),
            self.parallelism
        );

        let mut workers = JoinSet::new();
        for (idx, batch) in batches.into_iter().enumerate() {
            let worker = self.clone();
            workers.spawn(async move { (idx, worker.process_batch(batch).await) });
        }

        let mut results = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    workers.abort_all();
                    return Err(SyncError::Internal(format!("sync worker crashed: {}", e)));
                }
            }
        }

        results.sort_by_key(|(idx, _)| *idx);
        let outcomes: Vec<FileOutcome> = results
            .into_iter()
            .flat_map(|(_, outcomes)| outcomes)
            .collect();
        debug_assert_eq!(outcomes.len(), total);

        Ok(outcomes)
    }

    async fn process_batch(&self, batch: Vec<PathBuf>) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for path in batch {
            let outcome = self.process_file(path).await;
            self.reporter.report(&outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn process_file(&self, path: PathBuf) -> FileOutcome {
        let ctx = Arc::clone(&self.ctx);
        let decide_path = path.clone();
        let decision = tokio::task::spawn_blocking(move || decide(&ctx, &decide_path, compute_digest))
            .await
            .unwrap_or_else(|e| Err(SyncError::Internal(format!("decision task failed: {}", e))));

        let (key, outcome) = match decision {
            Ok(Decision::Ignored(reason)) => {
                tracing::debug!("{}: ignored ({:?})", path.display(), reason);
                (None, SyncOutcome::Ignored { reason })
            }
            Ok(Decision::Unchanged { key }) => {
                tracing::debug!("{}: unchanged at {}", path.display(), key);
                (Some(key), SyncOutcome::UnchangedSkip)
            }
            Ok(Decision::Upload {
                key,
                digest,
                reason,
            }) => {
                tracing::debug!("{}: upload ({:?}) to {}", path.display(), reason, key);
                let outcome = match self.upload(&path, &key, digest, reason).await {
                    Ok(bytes) => SyncOutcome::Uploaded { bytes },
                    Err(e) => self.failed(&path, &e),
                };
                (Some(key), outcome)
            }
            Err(e) => {
                let key = self.ctx.destination_key(&path).ok();
                (key, self.failed(&path, &e))
            }
        };

        FileOutcome { path, key, outcome }
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        digest: String,
        reason: UploadReason,
    ) -> Result<u64> {
        let metadata = HashMap::from([(DIGEST_METADATA_KEY.to_string(), digest)]);
        let bytes = self
            .retry
            .run(key, || {
                self.store
                    .upload_file(path, &self.bucket, key, metadata.clone())
            })
            .await?;

        tracing::info!(
            "Uploaded {} ({} bytes, {}) to s3://{}/{}",
            path.display(),
            bytes,
            match reason {
                UploadReason::New => "new",
                UploadReason::Changed => "changed",
            },
            self.bucket,
            key
        );
        Ok(bytes)
    }

    fn failed(&self, path: &Path, err: &SyncError) -> SyncOutcome {
        tracing::warn!("{}: {}", path.display(), err);
        SyncOutcome::Failed {
            reason: FailureReason::from(err),
        }
    }
}
