//! Snapshot of remote object state, used as the change-detection baseline

use std::collections::HashMap;

use crate::error::{Result, SyncError};
use crate::store::{ListedObject, ObjectStore};
use crate::types::RemoteObjectRecord;

/// Guard against a store that keeps handing back continuation tokens
const MAX_PAGES: usize = 1_000_000;

/// Read-only map from object key to its remote record
#[derive(Debug, Clone, Default)]
pub struct RemoteIndex {
    records: HashMap<String, RemoteObjectRecord>,
}

impl RemoteIndex {
    /// List every object under `prefix`, following continuation tokens.
    ///
    /// Any listing failure is fatal: a run without a baseline would upload
    /// everything.
    pub async fn build(store: &dyn ObjectStore, bucket: &str, prefix: &str) -> Result<Self> {
        let mut records = HashMap::new();
        let mut continuation = None;
        let mut pages = 0usize;

        loop {
            let page = store.list_page(bucket, prefix, continuation).await?;
            pages += 1;

            for object in page.objects {
                let record = to_record(object);
                records.insert(record.key.clone(), record);
            }

            match page.next_token {
                Some(token) if pages < MAX_PAGES => continuation = Some(token),
                Some(_) => {
                    return Err(SyncError::RemoteIndex(format!(
                        "listing s3://{}/{} did not terminate after {} pages",
                        bucket, prefix, pages
                    )))
                }
                None => break,
            }
        }

        tracing::info!(
            "Remote index for s3://{}/{}: {} objects in {} pages",
            bucket,
            prefix,
            records.len(),
            pages
        );
        Ok(Self { records })
    }

    /// Build directly from records
    pub fn from_records(records: impl IntoIterator<Item = RemoteObjectRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.key.clone(), record))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RemoteObjectRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn to_record(object: ListedObject) -> RemoteObjectRecord {
    RemoteObjectRecord {
        digest: normalize_etag(&object.etag),
        key: object.key,
        last_modified: object.last_modified,
    }
}

/// Strip quoting (including weak `W/` validators) and lower-case the digest
pub fn normalize_etag(etag: &str) -> String {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    etag.trim_matches('"').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("\"ABCdef\""), "abcdef");
        assert_eq!(normalize_etag("abc"), "abc");
        assert_eq!(normalize_etag("W/\"abc\""), "abc");
        assert_eq!(normalize_etag(""), "");
    }

    #[tokio::test]
    async fn test_build_follows_pagination() {
        let store = MemoryStore::new().with_page_size(3);
        let now = Utc::now();
        for i in 0..10 {
            store.insert("bucket", &format!("backup/f{:02}", i), b"x", now);
        }
        store.insert("bucket", "other/f", b"x", now);

        let index = RemoteIndex::build(&store, "bucket", "backup/").await.unwrap();
        assert_eq!(index.len(), 10);
        assert!(index.get("other/f").is_none());
        assert_eq!(store.list_calls(), 4);

        let record = index.get("backup/f07").unwrap();
        assert_eq!(record.digest, format!("{:x}", md5::compute(b"x")));
        assert_eq!(record.last_modified, now);
    }

    #[tokio::test]
    async fn test_build_empty_prefix() {
        let store = MemoryStore::new();
        store.create_bucket("bucket");
        let index = RemoteIndex::build(&store, "bucket", "nothing/").await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_build_fails_on_listing_error() {
        let store = MemoryStore::new();
        store.create_bucket("bucket");
        store.fail_listing("AccessDenied");

        let err = RemoteIndex::build(&store, "bucket", "").await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteIndex(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_build_fails_on_missing_bucket() {
        let store = MemoryStore::new();
        let err = RemoteIndex::build(&store, "missing", "").await.unwrap_err();
        assert!(err.is_fatal());
    }
}
