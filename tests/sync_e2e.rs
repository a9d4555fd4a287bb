//! End-to-end sync runs against the in-memory store
//!
//! Run with: cargo test --test sync_e2e

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use filetime::{set_file_mtime, FileTime};
use pretty_assertions::assert_eq;

use deltasync::report::CollectingReporter;
use deltasync::store::MemoryStore;
use deltasync::{
    run_sync, CutoffDate, FailureReason, IgnoreReason, SyncConfig, SyncError, SyncOutcome,
};

const BUCKET: &str = "backups";
const PREFIX: &str = "host1";

struct Env {
    dir: tempfile::TempDir,
    store: Arc<MemoryStore>,
    reporter: Arc<CollectingReporter>,
}

impl Env {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        store.create_bucket(BUCKET);
        Self {
            dir: tempfile::tempdir().unwrap(),
            store: Arc::new(store),
            reporter: Arc::new(CollectingReporter::new()),
        }
    }

    fn root(&self) -> PathBuf {
        std::fs::canonicalize(self.dir.path()).unwrap()
    }

    fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn write_at(&self, name: &str, content: &[u8], modified: DateTime<Utc>) -> PathBuf {
        let path = self.write(name, content);
        set_file_mtime(&path, FileTime::from_system_time(modified.into())).unwrap();
        path
    }

    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(
            self.root(),
            CutoffDate::at(Utc::now() - ChronoDuration::days(1)),
            BUCKET,
            PREFIX,
        );
        config.threads = 3;
        config.upload_timeout = Duration::from_secs(5);
        config.retry_base_delay = Duration::from_millis(1);
        config
    }

    fn reset_reporter(&mut self) {
        self.reporter = Arc::new(CollectingReporter::new());
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap().to_string_lossy().into_owned()
}

#[tokio::test]
async fn new_files_after_cutoff_are_uploaded() {
    let env = Env::new();
    env.write("a.txt", b"alpha");
    env.write("nested/b.txt", b"beta");
    env.write("nested/deeper/c.txt", b"gamma");

    let report = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    assert_eq!(report.summary.uploaded, 3);
    assert!(!report.summary.has_failures());
    let mut keys = env.store.upload_log();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "host1/a.txt".to_string(),
            "host1/nested/b.txt".to_string(),
            "host1/nested/deeper/c.txt".to_string(),
        ]
    );

    let obj = env.store.get(BUCKET, "host1/nested/b.txt").unwrap();
    assert_eq!(obj.data, b"beta");
    assert_eq!(
        obj.metadata.get("hash").cloned(),
        Some(format!("{:x}", md5::compute(b"beta")))
    );
}

#[tokio::test]
async fn ignore_file_excludes_matching_paths() {
    let env = Env::new();
    let ignore_dir = tempfile::tempdir().unwrap();
    let ignore_file = ignore_dir.path().join("ignore.txt");
    std::fs::write(&ignore_file, "*.tmp\n").unwrap();

    env.write("a.txt", b"a");
    env.write("b.tmp", b"b");

    let mut config = env.config();
    config.ignore_file = Some(ignore_file);
    let report = run_sync(&config, env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    let root = env.root();
    let by_name: Vec<(String, &'static str)> = report
        .outcomes
        .iter()
        .map(|o| (relative(&root, &o.path), o.outcome.as_str()))
        .collect();
    assert_eq!(
        by_name,
        vec![
            ("a.txt".to_string(), "uploaded"),
            ("b.tmp".to_string(), "ignored"),
        ]
    );
    assert_eq!(env.store.upload_log(), vec!["host1/a.txt".to_string()]);
}

#[tokio::test]
async fn files_before_cutoff_are_ignored_even_if_absent_remotely() {
    let env = Env::new();
    let old = Utc::now() - ChronoDuration::days(10);
    env.write_at("old.txt", b"old", old);
    env.write("fresh.txt", b"fresh");

    let report = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    let old_outcome = report
        .outcomes
        .iter()
        .find(|o| o.path.ends_with("old.txt"))
        .unwrap();
    assert_eq!(
        old_outcome.outcome,
        SyncOutcome::Ignored {
            reason: IgnoreReason::BeforeCutoff
        }
    );
    assert_eq!(env.store.upload_log(), vec!["host1/fresh.txt".to_string()]);
}

#[tokio::test]
async fn empty_directory_succeeds_with_no_outcomes() {
    let env = Env::new();

    let report = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(report.summary.total, 0);
    assert!(!report.summary.has_failures());
    assert_eq!(env.reporter.summary().map(|s| s.total), Some(0));
}

#[tokio::test]
async fn listing_failure_aborts_before_processing() {
    let env = Env::new();
    env.write("a.txt", b"a");
    env.store.fail_listing("NoSuchBucket");

    let err = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteIndex(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(env.reporter.outcomes().is_empty());
    assert!(env.reporter.summary().is_none());
    assert!(env.store.upload_log().is_empty());
}

#[tokio::test]
async fn missing_bucket_aborts() {
    let env = Env::new();
    env.write("a.txt", b"a");
    let mut config = env.config();
    config.bucket = "not-a-bucket".to_string();

    let err = run_sync(&config, env.store.clone(), env.reporter.clone())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(env.reporter.outcomes().is_empty());
}

#[tokio::test]
async fn unreadable_ignore_file_is_fatal() {
    let env = Env::new();
    env.write("a.txt", b"a");
    let mut config = env.config();
    config.ignore_file = Some(env.root().join("missing-ignore.txt"));

    let err = run_sync(&config, env.store.clone(), env.reporter.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
    assert_eq!(env.store.list_calls(), 0);
}

#[tokio::test]
async fn second_run_skips_unchanged_files() {
    let mut env = Env::with_store(MemoryStore::new().with_page_size(2));
    for i in 0..5 {
        env.write(&format!("f{}.bin", i), format!("content {}", i).as_bytes());
    }

    let first = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap();
    assert_eq!(first.summary.uploaded, 5);

    env.reset_reporter();
    let second = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    assert_eq!(second.summary.unchanged, 5);
    assert_eq!(second.summary.uploaded, 0);
    assert_eq!(env.store.upload_log().len(), 5);
    assert_eq!(env.reporter.outcomes().len(), 5);
}

#[tokio::test]
async fn changed_content_uploads_even_when_remote_is_newer() {
    let env = Env::new();
    let modified = Utc::now() - ChronoDuration::hours(2);
    env.write_at("doc.txt", b"edited", modified);
    env.store.insert(BUCKET, "host1/doc.txt", b"original", Utc::now());

    let report = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    assert!(matches!(
        report.outcomes[0].outcome,
        SyncOutcome::Uploaded { .. }
    ));
    assert_eq!(env.store.get(BUCKET, "host1/doc.txt").unwrap().data, b"edited");
}

#[tokio::test]
async fn matching_remote_copy_is_skipped() {
    let env = Env::new();
    let modified = Utc::now() - ChronoDuration::hours(2);
    env.write_at("same.txt", b"same", modified);
    env.store.insert(BUCKET, "host1/same.txt", b"same", Utc::now());

    let report = run_sync(&env.config(), env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].outcome, SyncOutcome::UnchangedSkip);
    assert!(env.store.upload_log().is_empty());
}

#[tokio::test]
async fn upload_failures_are_recorded_and_siblings_continue() {
    let env = Env::new();
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        env.write(name, name.as_bytes());
    }
    env.store.fail_uploads_for("host1/b.txt", true);

    let mut config = env.config();
    config.threads = 1;
    config.max_retries = 2;
    let report = run_sync(&config, env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.uploaded, 3);
    assert!(report.summary.has_failures());
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.outcome.is_failed())
        .unwrap();
    assert_eq!(failed.key.as_deref(), Some("host1/b.txt"));
    assert!(matches!(
        &failed.outcome,
        SyncOutcome::Failed {
            reason: FailureReason::Upload(_)
        }
    ));
}

#[tokio::test]
async fn every_file_reported_exactly_once() {
    let env = Env::with_store(MemoryStore::new().with_upload_delay(Duration::from_millis(2)));
    for i in 0..25 {
        env.write(&format!("dir{}/file{}.dat", i % 4, i), &[i as u8; 16]);
    }

    let mut config = env.config();
    config.threads = 8;
    let report = run_sync(&config, env.store.clone(), env.reporter.clone())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 25);
    let mut reported: Vec<PathBuf> = env.reporter.outcomes().into_iter().map(|o| o.path).collect();
    let mut returned: Vec<PathBuf> = report.outcomes.iter().map(|o| o.path.clone()).collect();
    reported.sort();
    returned.sort();
    assert_eq!(reported, returned);
    reported.dedup();
    assert_eq!(reported.len(), 25);
}

/// Sets mode 0o311 on `dir`; false when the current user can still list it
/// (privileged users ignore permission bits).
#[cfg(unix)]
fn deny_listing(dir: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o311)).unwrap();
    std::fs::read_dir(dir).is_err()
}

#[cfg(unix)]
fn allow_listing(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
#[cfg(unix)]
async fn unlistable_root_is_fatal() {
    let env = Env::new();
    env.write("root/sub/a.txt", b"a");
    let root = env.root().join("root");

    let mut config = env.config();
    config.directory = root.clone();
    if !deny_listing(&root) {
        allow_listing(&root);
        return;
    }
    let result = run_sync(&config, env.store.clone(), env.reporter.clone()).await;
    allow_listing(&root);

    let err = result.unwrap_err();
    assert!(matches!(err, SyncError::Config(_)), "{:?}", err);
    assert_eq!(err.exit_code(), 2);
    assert!(env.reporter.outcomes().is_empty());
    assert!(env.store.upload_log().is_empty());
}

#[tokio::test]
#[cfg(unix)]
async fn unlistable_subdirectory_is_a_failed_outcome() {
    let env = Env::new();
    env.write("locked/secret.txt", b"s");
    env.write("open.txt", b"o");
    let locked = env.root().join("locked");

    if !deny_listing(&locked) {
        allow_listing(&locked);
        return;
    }
    let result = run_sync(&env.config(), env.store.clone(), env.reporter.clone()).await;
    allow_listing(&locked);

    let report = result.unwrap();
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.uploaded, 1);
    assert_eq!(report.summary.failed, 1);
    assert!(report.summary.has_failures());

    let failed = report
        .outcomes
        .iter()
        .find(|o| o.outcome.is_failed())
        .unwrap();
    assert_eq!(failed.path, locked);
    assert!(matches!(
        &failed.outcome,
        SyncOutcome::Failed {
            reason: FailureReason::Read(_)
        }
    ));
    assert_eq!(env.reporter.outcomes().len(), 2);
    assert_eq!(env.store.upload_log(), vec!["host1/open.txt".to_string()]);
}
