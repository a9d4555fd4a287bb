//! Object store backends
//!
//! The engine only needs two primitives from a store: paginated listing
//! under a prefix and single-object upload with user metadata.
//!
//! # Feature Flags
//!
//! The S3 backend requires the `cloud` feature. The in-memory store is
//! always available.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

mod memory;
#[cfg(feature = "cloud")]
mod s3;

pub use memory::{MemoryStore, StoredObject};
#[cfg(feature = "cloud")]
pub use s3::{S3Options, S3Store};

/// One object as returned by a listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    /// Raw entity tag, possibly quoted
    pub etag: String,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    /// Token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// Store client consumed by the sync engine. Must be safe for concurrent use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of objects under `prefix`
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage>;

    /// Upload a local file, returning the number of bytes sent
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<u64>;
}
