//! The narrow object-store contract the workload drives.
//!
//! Backends classify their failures into the kinds callers branch on:
//! [`Error::NotFound`] for missing buckets, [`Error::NoSuchKey`] for
//! missing objects, [`Error::Conflict`] for bucket creation races.
//! Everything else is opaque [`Error::Transport`].
//!
//! Cancellation is handled by the callers between operations; an in-flight
//! call runs to completion.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};

/// Streamed object body returned by [`ObjectStore::get_object`].
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Storage backend contract for the validation workload.
///
/// All backends (S3, memory) implement this trait; consumers hold
/// `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Checks that a bucket exists.
    ///
    /// Returns [`Error::NotFound`] when it does not.
    async fn head_bucket(&self, bucket: &str) -> Result<()>;

    /// Creates a bucket.
    ///
    /// Returns [`Error::Conflict`] when the bucket already exists; callers
    /// racing with other processes treat that as success.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Deletes every object under `prefix` in the bucket.
    async fn clear_bucket(&self, bucket: &str, prefix: &str) -> Result<()>;

    /// Writes an object and returns the number of uploaded parts:
    /// 1 for a single-shot PUT, `ceil(len / multipart_thresh)` for a
    /// multipart upload.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<u32>;

    /// Opens an object for reading.
    ///
    /// Returns [`Error::NoSuchKey`] when the object does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    /// Lists every key under `prefix`, paginating until exhausted.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Deletes an object. Succeeds even if the object does not exist.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// In-memory storage backend for tests.
///
/// Thread-safe via `RwLock`. Buckets are explicit namespaces so the
/// NotFound/Conflict classification behaves like the real backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    multipart_thresh: usize,
    buckets: Arc<RwLock<HashMap<String, HashMap<String, Bytes>>>>,
}

impl MemoryBackend {
    /// Creates an empty backend with the given multipart threshold
    /// (used only to compute the reported part count).
    #[must_use]
    pub fn new(multipart_thresh: usize) -> Self {
        Self {
            multipart_thresh,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Writes raw bytes without bucket bookkeeping, for test setup.
    pub fn put_raw(&self, bucket: &str, key: &str, body: Bytes) {
        self.write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
    }

    /// Returns the stored bytes of an object, for test assertions.
    #[must_use]
    pub fn raw_object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.read().get(bucket)?.get(key).cloned()
    }

    /// Removes an object behind the workload's back, for test setup.
    pub fn remove_raw(&self, bucket: &str, key: &str) {
        if let Some(objects) = self.write().get_mut(bucket) {
            objects.remove(key);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HashMap<String, Bytes>>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HashMap<String, Bytes>>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        if self.read().contains_key(bucket) {
            Ok(())
        } else {
            Err(Error::NotFound {
                bucket: bucket.to_string(),
            })
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.write();
        if buckets.contains_key(bucket) {
            return Err(Error::Conflict {
                message: format!("bucket {bucket} already exists"),
            });
        }
        buckets.insert(bucket.to_string(), HashMap::new());
        Ok(())
    }

    async fn clear_bucket(&self, bucket: &str, prefix: &str) -> Result<()> {
        let mut buckets = self.write();
        let objects = buckets.get_mut(bucket).ok_or_else(|| Error::NotFound {
            bucket: bucket.to_string(),
        })?;
        objects.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<u32> {
        let part_count = if self.multipart_thresh == 0 || body.len() <= self.multipart_thresh {
            1
        } else {
            u32::try_from(body.len().div_ceil(self.multipart_thresh))
                .map_err(|_| Error::internal("part count overflow"))?
        };
        let mut buckets = self.write();
        let objects = buckets.get_mut(bucket).ok_or_else(|| Error::NotFound {
            bucket: bucket.to_string(),
        })?;
        objects.insert(key.to_string(), body);
        Ok(part_count)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let buckets = self.read();
        let body = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| Error::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok(Box::new(Cursor::new(body)))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let buckets = self.read();
        let objects = buckets.get(bucket).ok_or_else(|| Error::NotFound {
            bucket: bucket.to_string(),
        })?;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        if let Some(objects) = self.write().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}
