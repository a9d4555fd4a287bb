//! In-process object store
//!
//! Behaves like a single-region S3 bucket set: listings are sorted by key and
//! paginated, uploads record an MD5 entity tag. Failures can be injected for
//! listings and for individual keys.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ListPage, ListedObject, ObjectStore};
use crate::error::{Result, SyncError};

/// An object held by [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    failing_keys: HashMap<String, bool>,
    hung_keys: HashSet<String>,
    listing_error: Option<String>,
    upload_log: Vec<String>,
    list_calls: usize,
}

/// Thread-safe in-memory store
pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
    upload_delay: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 1000,
            upload_delay: None,
        }
    }

    /// Limit listing pages to `page_size` objects
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sleep before every upload
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Create an empty bucket
    pub fn create_bucket(&self, bucket: &str) {
        self.state.lock().buckets.entry(bucket.to_string()).or_default();
    }

    /// Place an object directly, bypassing upload
    pub fn insert(&self, bucket: &str, key: &str, data: &[u8], last_modified: DateTime<Utc>) {
        let object = StoredObject {
            data: data.to_vec(),
            last_modified,
            etag: format!("\"{:x}\"", md5::compute(data)),
            metadata: HashMap::new(),
        };
        self.state
            .lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Make every listing call fail with `message`
    pub fn fail_listing(&self, message: &str) {
        self.state.lock().listing_error = Some(message.to_string());
    }

    /// Make uploads of `key` fail; `transient` failures are retryable
    pub fn fail_uploads_for(&self, key: &str, transient: bool) {
        self.state
            .lock()
            .failing_keys
            .insert(key.to_string(), transient);
    }

    /// Clear an injected upload failure
    pub fn heal(&self, key: &str) {
        self.state.lock().failing_keys.remove(key);
    }

    /// Make uploads of `key` never complete
    pub fn hang_uploads_for(&self, key: &str) {
        self.state.lock().hung_keys.insert(key.to_string());
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    /// Keys in the order uploads completed, including repeats
    pub fn upload_log(&self) -> Vec<String> {
        self.state.lock().upload_log.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let mut state = self.state.lock();
        state.list_calls += 1;

        if let Some(message) = &state.listing_error {
            return Err(SyncError::RemoteIndex(message.clone()));
        }

        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| SyncError::RemoteIndex(format!("NoSuchBucket: {}", bucket)))?;

        // The continuation token is the last key of the previous page
        let mut page: Vec<ListedObject> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_deref().map_or(true, |after| key.as_str() > after))
            .take(self.page_size + 1)
            .map(|(key, obj)| ListedObject {
                key: key.clone(),
                last_modified: obj.last_modified,
                etag: obj.etag.clone(),
            })
            .collect();

        let next_token = if page.len() > self.page_size {
            page.truncate(self.page_size);
            page.last().map(|obj| obj.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            next_token,
        })
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<u64> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        let (hung, failing) = {
            let state = self.state.lock();
            (
                state.hung_keys.contains(key),
                state.failing_keys.get(key).copied(),
            )
        };
        if hung {
            std::future::pending::<()>().await;
        }
        if let Some(transient) = failing {
            return Err(SyncError::Upload {
                message: format!("injected failure for {}", key),
                transient,
            });
        }

        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| SyncError::from_file_io(local_path, e))?;
        let size = data.len() as u64;

        let mut state = self.state.lock();
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| SyncError::Upload {
                message: format!("NoSuchBucket: {}", bucket),
                transient: false,
            })?;
        objects.insert(
            key.to_string(),
            StoredObject {
                etag: format!("\"{:x}\"", md5::compute(&data)),
                data,
                last_modified: Utc::now(),
                metadata,
            },
        );
        state.upload_log.push(key.to_string());

        Ok(size)
    }
}
