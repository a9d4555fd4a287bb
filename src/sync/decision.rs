//! Per-file upload decision
//!
//! Order of checks:
//! 1. ignore patterns
//! 2. modification time against the cutoff
//! 3. destination key derivation
//! 4. content digest (always, since uploads carry it as metadata)
//! 5. remote lookup: absent means new; present is skipped only when the
//!    remote copy is at least as new *and* has the same digest

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use super::index::RemoteIndex;
use crate::error::{Result, SyncError};
use crate::ignore::IgnoreMatcher;
use crate::types::{CutoffDate, IgnoreReason, LocalFile, SyncConfig};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Why an upload is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    /// No object under the destination key
    New,
    /// Remote copy is older or differs in content
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ignored(IgnoreReason),
    Unchanged {
        key: String,
    },
    Upload {
        key: String,
        digest: String,
        reason: UploadReason,
    },
}

/// Immutable inputs shared by every decision in a run
#[derive(Debug)]
pub struct DecisionContext {
    pub base_dir: PathBuf,
    pub prefix: String,
    pub cutoff: CutoffDate,
    pub ignore: IgnoreMatcher,
    pub index: RemoteIndex,
}

impl DecisionContext {
    pub fn new(config: &SyncConfig, ignore: IgnoreMatcher, index: RemoteIndex) -> Self {
        Self {
            base_dir: config.directory.clone(),
            prefix: config.prefix.clone(),
            cutoff: config.cutoff,
            ignore,
            index,
        }
    }

    pub fn destination_key(&self, path: &Path) -> Result<String> {
        destination_key(&self.prefix, &self.base_dir, path)
    }
}

/// Decide what to do with one file.
///
/// File metadata is read here, not at discovery, so a file that vanished
/// since the walk surfaces as `SyncError::NotFound`.
pub fn decide<D>(ctx: &DecisionContext, path: &Path, digest: D) -> Result<Decision>
where
    D: FnOnce(&Path) -> Result<String>,
{
    if ctx.ignore.is_ignored(path) {
        return Ok(Decision::Ignored(IgnoreReason::Pattern));
    }

    let local = LocalFile::stat(path)?;
    if ctx.cutoff.excludes(local.modified) {
        return Ok(Decision::Ignored(IgnoreReason::BeforeCutoff));
    }

    let key = ctx.destination_key(path)?;
    let digest = digest(path)?;

    let reason = match ctx.index.get(&key) {
        None => UploadReason::New,
        Some(remote) if remote.last_modified >= local.modified && remote.digest == digest => {
            return Ok(Decision::Unchanged { key });
        }
        Some(_) => UploadReason::Changed,
    };

    Ok(Decision::Upload {
        key,
        digest,
        reason,
    })
}

/// Lower-case hex MD5 of the full file content, read once
pub fn compute_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| SyncError::from_file_io(path, e))?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| SyncError::from_file_io(path, e))?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// `prefix` joined with the path relative to `base`, always `/`-separated.
///
/// An empty prefix or one ending in `/` is used as-is; otherwise a `/` is
/// inserted between prefix and relative path.
pub fn destination_key(prefix: &str, base: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| SyncError::OutsideRoot(path.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            _ => return Err(SyncError::OutsideRoot(path.to_path_buf())),
        }
    }
    if parts.is_empty() {
        return Err(SyncError::OutsideRoot(path.to_path_buf()));
    }
    let relative = parts.join("/");

    if prefix.is_empty() || prefix.ends_with('/') {
        Ok(format!("{}{}", prefix, relative))
    } else {
        Ok(format!("{}/{}", prefix, relative))
    }
}
