//! deltasync CLI
//!
//! Uploads new or changed files from a local directory to an S3 bucket.
//!
//! Exit codes: 0 on success, 1 if any file failed (unless
//! `--allow-failures`), 2 on fatal errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deltasync::report::{LineReporter, ReportFormat};
use deltasync::store::{S3Options, S3Store};
use deltasync::{run_sync, CutoffDate, SyncConfig, SyncError, DEFAULT_THREADS};

#[derive(Parser)]
#[command(name = "deltasync")]
#[command(about = "Upload files changed since a date to S3, skipping unchanged content")]
#[command(version)]
struct Cli {
    /// Root of the local tree to scan
    #[arg(long, env = "DELTASYNC_DIRECTORY")]
    directory: String,

    /// Cutoff date (yyyy-mm-dd); only files modified after it are candidates
    #[arg(long, env = "DELTASYNC_DATE")]
    date: String,

    /// Destination bucket
    #[arg(long, env = "DELTASYNC_BUCKET")]
    bucket: String,

    /// Destination key prefix
    #[arg(long, env = "DELTASYNC_PREFIX")]
    prefix: String,

    /// Worker pool size
    #[arg(long, env = "DELTASYNC_THREADS", default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Newline-delimited glob ignore-pattern file
    #[arg(long, env = "DELTASYNC_IGNORE")]
    ignore: Option<String>,

    /// Per-upload timeout in seconds
    #[arg(long, env = "DELTASYNC_UPLOAD_TIMEOUT_SECS", default_value = "300")]
    upload_timeout_secs: u64,

    /// Retries for transient upload failures
    #[arg(long, env = "DELTASYNC_RETRIES", default_value = "2")]
    retries: u32,

    /// Base retry backoff in milliseconds
    #[arg(long, env = "DELTASYNC_RETRY_BASE_MS", default_value = "200")]
    retry_base_ms: u64,

    /// Exit 0 even if some files failed to upload
    #[arg(long)]
    allow_failures: bool,

    /// Emit one JSON object per outcome instead of text lines
    #[arg(long)]
    json: bool,

    /// AWS region override
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Custom endpoint for S3-compatible stores (R2, MinIO)
    #[arg(long, env = "DELTASYNC_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn to_config(&self) -> Result<SyncConfig, SyncError> {
        let cutoff = CutoffDate::parse(&self.date)?;
        let directory = PathBuf::from(shellexpand::tilde(&self.directory).into_owned());

        let mut config = SyncConfig::new(directory, cutoff, &self.bucket, &self.prefix);
        config.threads = self.threads;
        config.ignore_file = self
            .ignore
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()));
        config.upload_timeout = Duration::from_secs(self.upload_timeout_secs);
        config.max_retries = self.retries;
        config.retry_base_delay = Duration::from_millis(self.retry_base_ms);

        config.validate()
    }
}

fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deltasync=info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the report; logs go to stderr
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = cli.to_config()?;

    let store = S3Store::connect(&S3Options {
        region: cli.region.clone(),
        endpoint_url: cli.endpoint_url.clone(),
    })
    .await;

    let format = if cli.json {
        ReportFormat::Json
    } else {
        ReportFormat::Text
    };
    let reporter = LineReporter::stdout(&config.bucket, format);

    let report = run_sync(&config, Arc::new(store), Arc::new(reporter))
        .await
        .with_context(|| {
            format!(
                "sync of {} to s3://{}/{} aborted",
                config.directory.display(),
                config.bucket,
                config.prefix
            )
        })?;

    Ok(report.summary.has_failures())
}

/// Process exit code for a finished or aborted run.
///
/// 0 when every file succeeded, or when failures are tolerated with
/// `--allow-failures`. 1 when any file failed. Fatal errors map through
/// [`SyncError::exit_code`], and anything unclassified is treated as fatal.
fn exit_code(result: &anyhow::Result<bool>, allow_failures: bool) -> u8 {
    match result {
        Ok(false) => 0,
        Ok(true) if allow_failures => 0,
        Ok(true) => 1,
        Err(e) => e
            .downcast_ref::<SyncError>()
            .map(SyncError::exit_code)
            .unwrap_or(2),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let result = run(&cli).await;
    match &result {
        Ok(true) if cli.allow_failures => {
            tracing::warn!("Some files failed to upload; exiting 0 (--allow-failures)")
        }
        Ok(true) => tracing::error!("Some files failed to upload"),
        Ok(false) => {}
        Err(e) => eprintln!("Error: {:#}", e),
    }
    ExitCode::from(exit_code(&result, cli.allow_failures))
}
