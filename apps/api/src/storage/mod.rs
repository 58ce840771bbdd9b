//! Object storage for uploaded PDFs, images, diagrams, and rendered videos.
//!
//! Handlers talk to `Arc<dyn ObjectStore>`; production uses `S3Storage`
//! (MinIO locally, AWS in production).

pub mod handlers;
pub mod keys;
pub mod s3;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

pub use s3::S3Storage;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("copy failed: {0}")]
    CopyFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("list failed: {0}")]
    ListFailed(String),

    #[error("presign failed: {0}")]
    PresignFailed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified_ms: Option<i64>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_bytes(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<()>;

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Server-side copy within the bucket.
    async fn copy_object(&self, from: &str, to: &str) -> StorageResult<()>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Stable (unsigned) URL recorded on asset rows.
    fn object_url(&self, key: &str) -> String;

    /// Inverse of `object_url`; also accepts presigned URLs and `s3://bucket/key`.
    fn key_from_url(&self, url: &str) -> Option<String>;
}

#[cfg(test)]
pub mod testing {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    /// In-memory bucket. Keys listed in `fail_deletes` refuse to be deleted.
    #[derive(Default)]
    pub struct MemoryStore {
        pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
        pub fail_deletes: HashSet<String>,
        pub delete_attempts: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        pub fn with_objects(keys: &[&str]) -> Self {
            let store = Self::default();
            {
                let mut objects = store.objects.lock().unwrap();
                for key in keys {
                    objects.insert(key.to_string(), key.as_bytes().to_vec());
                }
            }
            store
        }

        pub fn contains(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(key)
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put_bytes(&self, key: &str, bytes: Bytes, _content_type: &str) -> StorageResult<()> {
            self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }

        async fn copy_object(&self, from: &str, to: &str) -> StorageResult<()> {
            let mut objects = self.objects.lock().unwrap();
            let bytes = objects
                .get(from)
                .cloned()
                .ok_or_else(|| StorageError::CopyFailed(format!("{from} does not exist")))?;
            objects.insert(to.to_string(), bytes);
            Ok(())
        }

        async fn delete_object(&self, key: &str) -> StorageResult<()> {
            self.delete_attempts.lock().unwrap().push(key.to_string());
            if self.fail_deletes.contains(key) {
                return Err(StorageError::DeleteFailed(format!("{key}: access denied")));
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| ObjectInfo {
                    key: k.clone(),
                    size: v.len() as u64,
                    last_modified_ms: None,
                })
                .collect())
        }

        async fn presign_get(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
            Ok(format!("{}?signed=get", self.object_url(key)))
        }

        async fn presign_put(
            &self,
            key: &str,
            _content_type: &str,
            _expires_in: Duration,
        ) -> StorageResult<String> {
            Ok(format!("{}?signed=put", self.object_url(key)))
        }

        fn object_url(&self, key: &str) -> String {
            format!("memory://bucket/{key}")
        }

        fn key_from_url(&self, url: &str) -> Option<String> {
            url.strip_prefix("memory://bucket/")
                .map(|k| k.split('?').next().unwrap_or(k).to_string())
        }
    }
}
