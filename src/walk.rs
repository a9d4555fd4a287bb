//! Directory discovery

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, SyncError};

/// Result of walking the sync root
#[derive(Debug, Default)]
pub struct Discovery {
    /// Regular files, in walk order
    pub files: Vec<PathBuf>,
    /// Entries below the root that could not be read, with the reason
    pub unreadable: Vec<(PathBuf, String)>,
}

/// Collect every regular file under `root`, recursively.
///
/// Entries within a directory are visited in file-name order, so the same
/// tree always yields the same list. Symlinks are not followed. Failing to
/// list the root itself is a `Config` error; anything unreadable below it is
/// returned in [`Discovery::unreadable`] so the run can report it.
pub fn discover_files(root: &Path) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(SyncError::Config(format!(
            "{} is not a readable directory",
            root.display()
        )));
    }

    let mut discovery = Discovery::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 || e.path() == Some(root) => {
                return Err(SyncError::Config(format!(
                    "cannot read directory {}: {}",
                    root.display(),
                    e
                )));
            }
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                tracing::warn!("Cannot read {}: {}", path.display(), e);
                discovery.unreadable.push((path, e.to_string()));
                continue;
            }
        };

        if entry.file_type().is_file() {
            discovery.files.push(entry.into_path());
        }
    }

    tracing::debug!(
        "Discovered {} files under {} ({} unreadable)",
        discovery.files.len(),
        root.display(),
        discovery.unreadable.len()
    );
    Ok(discovery)
}
