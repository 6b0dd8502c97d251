//! The per-worker operation state machine.
//!
//! Every operation follows pre-validate → mutate → post-validate; any
//! divergence between the in-memory model and what the store returns is a
//! terminal error that propagates to the runner.
//!
//! Ordering is load-bearing: on PUT the in-memory update (size, write
//! count, registration) happens before the remote write, so an interrupted
//! PUT whose bytes later surface already matches expectation. On DELETE
//! the index is popped from the existing set before the remote delete.
//!
//! A validation failure observed while the run is being cancelled is
//! suppressed: the body may be a partial read of a half-finished transfer.

use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use ovid_core::data_unit;
use ovid_core::error::{Error, Result};
use ovid_core::sampler;
use ovid_core::stat::Stat;
use ovid_core::storage::ObjectStore;

use crate::context::{BucketWithObject, WorkerState};

/// One workload worker: an exclusive slice of the keyspace per bucket and
/// the state machine that mutates it.
pub struct Worker {
    id: u16,
    min_size: usize,
    max_size: usize,
    buckets: Vec<BucketWithObject>,
    storage: Arc<dyn ObjectStore>,
    stat: Arc<Stat>,
}

impl Worker {
    /// Creates a worker over its per-bucket registries.
    #[must_use]
    pub fn new(
        id: u16,
        min_size: usize,
        max_size: usize,
        buckets: Vec<BucketWithObject>,
        storage: Arc<dyn ObjectStore>,
        stat: Arc<Stat>,
    ) -> Self {
        Self {
            id,
            min_size,
            max_size,
            buckets,
            storage,
            stat,
        }
    }

    /// The 16-bit worker ID embedded in every data unit this worker writes.
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Extracts the persistable state for context save.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        WorkerState {
            buckets_with_object: self.buckets.clone(),
        }
    }

    /// Logs the worker's key range. The range is identical across buckets,
    /// so only the first registry is shown.
    pub fn log_key_range(&self) {
        let (head, tail) = self.buckets[0].object_meta.head_tail_keys();
        tracing::info!(
            worker_id = format!("{:#06x}", self.id),
            key_range = format!("[{head}, {tail}]"),
            "worker initialized"
        );
    }

    /// PUT: overwrite or create a random object, validating the previous
    /// generation first and the new bytes afterwards.
    ///
    /// # Errors
    ///
    /// Terminal on any model divergence, corruption, or transport failure.
    pub async fn put(&mut self, token: &CancellationToken) -> Result<()> {
        let bucket_index = self.random_bucket_index();
        let bucket_name = self.buckets[bucket_index].bucket_name.clone();
        let object_index = self.buckets[bucket_index].object_meta.random_index();
        let key = self.buckets[bucket_index]
            .object_meta
            .object(object_index)
            .key
            .clone();

        // Validation before write: the previous generation must match the
        // model exactly.
        match self.storage.get_object(&bucket_name, &key).await {
            Err(err) if err.is_no_such_key() => {
                if self.buckets[bucket_index].object_meta.exist(&key) {
                    return Err(Error::ObjectLost {
                        message: format!("an object has been lost (key = {key})"),
                    });
                }
            }
            Err(err) => return Err(err),
            Ok(mut reader) => {
                let meta = &self.buckets[bucket_index].object_meta;
                if !meta.exist(&key) {
                    return Err(Error::UnexpectedObject {
                        message: format!("an unexpected object was found (key = {key})"),
                    });
                }
                let obj = meta.object(object_index);
                if let Err(err) =
                    data_unit::validate(u32::from(self.id), &bucket_name, obj, &mut reader).await
                {
                    return self.mask_if_cancelled(token, err, "before put");
                }
                self.stat.add_get_for_valid_count();
            }
        }

        let size = sampler::decide_size(self.min_size, self.max_size)?;
        {
            let meta = &mut self.buckets[bucket_index].object_meta;
            meta.register_existing(&key)?;
            let obj = meta.object_mut(object_index);
            obj.size = size;
            obj.write_count += 1;
        }

        let body = {
            let obj = self.buckets[bucket_index].object_meta.object(object_index);
            data_unit::generate(size, u32::from(self.id), &bucket_name, obj)?
        };
        let part_count = self.storage.put_object(&bucket_name, &key, body).await?;
        self.stat.add_uploaded_part_count(u64::from(part_count));
        self.stat.add_put_count();

        // Validation after write: the store must return the new generation.
        let mut reader = match self.storage.get_object(&bucket_name, &key).await {
            Ok(reader) => reader,
            Err(err) if err.is_no_such_key() => {
                return Err(Error::ObjectLost {
                    message: format!("object lost after put (key = {key})"),
                });
            }
            Err(err) => return Err(err),
        };
        let obj = self.buckets[bucket_index].object_meta.object(object_index);
        if let Err(err) =
            data_unit::validate(u32::from(self.id), &bucket_name, obj, &mut reader).await
        {
            return self.mask_if_cancelled(token, err, "after put");
        }
        self.stat.add_get_for_valid_count();
        Ok(())
    }

    /// GET: read and validate a random existing object. No-op when the
    /// worker has not created anything yet.
    ///
    /// # Errors
    ///
    /// Terminal on any model divergence, corruption, or transport failure.
    pub async fn get(&mut self, token: &CancellationToken) -> Result<()> {
        let bucket_index = self.random_bucket_index();
        let bucket_name = self.buckets[bucket_index].bucket_name.clone();
        let Some(object_index) = self.buckets[bucket_index].object_meta.random_existing_index()
        else {
            return Ok(());
        };
        let obj = self.buckets[bucket_index].object_meta.object(object_index);

        let mut reader = match self.storage.get_object(&bucket_name, &obj.key).await {
            Ok(reader) => reader,
            Err(err) if err.is_no_such_key() => {
                return Err(Error::ObjectLost {
                    message: format!("object lost before get (key = {})", obj.key),
                });
            }
            Err(err) => return Err(err),
        };
        if let Err(err) =
            data_unit::validate(u32::from(self.id), &bucket_name, obj, &mut reader).await
        {
            return self.mask_if_cancelled(token, err, "at get");
        }
        self.stat.add_get_count();
        Ok(())
    }

    /// DELETE: remove a random existing object, validating its bytes
    /// first and verifying it is gone afterwards. No-op when nothing
    /// exists.
    ///
    /// # Errors
    ///
    /// Terminal on any model divergence, corruption, or transport failure.
    pub async fn delete(&mut self, token: &CancellationToken) -> Result<()> {
        let bucket_index = self.random_bucket_index();
        let bucket_name = self.buckets[bucket_index].bucket_name.clone();
        let Some(object_index) = self.buckets[bucket_index].object_meta.pop_random_existing()?
        else {
            return Ok(());
        };
        let key = self.buckets[bucket_index]
            .object_meta
            .object(object_index)
            .key
            .clone();

        // Validation before delete.
        let mut reader = match self.storage.get_object(&bucket_name, &key).await {
            Ok(reader) => reader,
            Err(err) if err.is_no_such_key() => {
                return Err(Error::ObjectLost {
                    message: format!("object lost before delete (key = {key})"),
                });
            }
            Err(err) => return Err(err),
        };
        {
            let obj = self.buckets[bucket_index].object_meta.object(object_index);
            if let Err(err) =
                data_unit::validate(u32::from(self.id), &bucket_name, obj, &mut reader).await
            {
                return self.mask_if_cancelled(token, err, "before delete");
            }
        }
        self.stat.add_get_for_valid_count();

        self.storage.delete_object(&bucket_name, &key).await?;
        self.stat.add_delete_count();

        // Validation after delete: the key must be gone.
        match self.storage.get_object(&bucket_name, &key).await {
            Ok(_) => Err(Error::UnexpectedObject {
                message: format!("object found after delete (key = {key})"),
            }),
            Err(err) if err.is_no_such_key() => {
                self.buckets[bucket_index]
                    .object_meta
                    .object_mut(object_index)
                    .clear();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// LIST: enumerate the worker's key prefix and compare the result with
    /// the existing set, both in count and membership.
    ///
    /// # Errors
    ///
    /// Terminal on any mismatch or transport failure.
    pub async fn list(&mut self, _token: &CancellationToken) -> Result<()> {
        let bucket_index = self.random_bucket_index();
        let bucket_name = self.buckets[bucket_index].bucket_name.clone();
        let meta = &self.buckets[bucket_index].object_meta;

        let names = self
            .storage
            .list_objects(&bucket_name, meta.key_prefix())
            .await?;

        let expected = meta.existing_count();
        if names.len() < expected {
            return Err(Error::ObjectLost {
                message: format!(
                    "list returned too few objects (expected = {expected}, actual = {})",
                    names.len()
                ),
            });
        }
        if names.len() > expected {
            return Err(Error::UnexpectedObject {
                message: format!(
                    "list returned too many objects (expected = {expected}, actual = {})",
                    names.len()
                ),
            });
        }
        for name in &names {
            if !meta.exist(name) {
                return Err(Error::UnexpectedObject {
                    message: format!(
                        "unknown key {name} in list result (worker_id = {:#06x})",
                        self.id
                    ),
                });
            }
        }
        self.stat.add_list_count();
        Ok(())
    }

    fn random_bucket_index(&self) -> usize {
        rand::thread_rng().gen_range(0..self.buckets.len())
    }

    /// Validation failures observed during cancellation are suppressed:
    /// the body may be a partial read.
    fn mask_if_cancelled(
        &self,
        token: &CancellationToken,
        err: Error,
        phase: &str,
    ) -> Result<()> {
        if token.is_cancelled() && err.is_validation_failure() {
            tracing::warn!(
                worker_id = format!("{:#06x}", self.id),
                phase,
                "validation failed during cancellation; suppressing"
            );
            return Ok(());
        }
        tracing::error!(
            worker_id = format!("{:#06x}", self.id),
            phase,
            error = %err,
            "validation failed"
        );
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ovid_core::data_unit::DATA_UNIT_SIZE;
    use ovid_core::object::ObjectMeta;
    use ovid_core::storage::MemoryBackend;

    const PROCESS_TAG: u64 = 0x01u64 << 32;

    fn memory_worker(num_obj: usize, buckets: &[&str]) -> (Worker, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new(0));
        let buckets_with_object = buckets
            .iter()
            .map(|name| BucketWithObject {
                bucket_name: (*name).to_string(),
                object_meta: ObjectMeta::new(num_obj, PROCESS_TAG),
            })
            .collect();
        let worker = Worker::new(
            0x0042,
            DATA_UNIT_SIZE,
            DATA_UNIT_SIZE * 4,
            buckets_with_object,
            backend.clone(),
            Arc::new(Stat::new()),
        );
        (worker, backend)
    }

    async fn put_until_registered(worker: &mut Worker, token: &CancellationToken) -> String {
        // One object per registry, so a single put targets a known key.
        worker.put(token).await.unwrap();
        worker.buckets[0].object_meta.object(0).key.clone()
    }

    #[tokio::test]
    async fn put_stores_a_decodable_object_and_registers_it() {
        let (mut worker, backend) = memory_worker(1, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        let key = put_until_registered(&mut worker, &token).await;
        assert_eq!(key, "ov0100000000");
        assert!(worker.buckets[0].object_meta.exist(&key));

        let obj = worker.buckets[0].object_meta.object(0);
        assert_eq!(obj.write_count, 1);
        assert!(obj.size >= DATA_UNIT_SIZE && obj.size % DATA_UNIT_SIZE == 0);

        let body = backend.raw_object("b1", &key).unwrap();
        assert_eq!(body.len(), obj.size);
        let mut reader = std::io::Cursor::new(body);
        data_unit::validate(0x42, "b1", obj, &mut reader).await.unwrap();

        assert_eq!(worker.stat.put_count(), 1);
        assert_eq!(worker.stat.uploaded_part_count(), 1);
        // A fresh object has no pre-validation GET; only the post one.
        assert_eq!(worker.stat.get_for_valid_count(), 1);
    }

    #[tokio::test]
    async fn overwrite_bumps_the_write_count_and_validates_the_old_bytes() {
        let (mut worker, backend) = memory_worker(1, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        worker.put(&token).await.unwrap();
        worker.put(&token).await.unwrap();

        let obj = worker.buckets[0].object_meta.object(0);
        assert_eq!(obj.write_count, 2);
        assert_eq!(worker.stat.put_count(), 2);
        // Second put pre-validates the first generation.
        assert_eq!(worker.stat.get_for_valid_count(), 3);
    }

    #[tokio::test]
    async fn lost_object_is_detected_on_put() {
        let (mut worker, backend) = memory_worker(1, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        let key = put_until_registered(&mut worker, &token).await;
        backend.remove_raw("b1", &key);

        let err = worker.put(&token).await.unwrap_err();
        assert!(matches!(err, Error::ObjectLost { .. }), "{err}");
    }

    #[tokio::test]
    async fn unexpected_object_is_detected_on_put() {
        let (mut worker, backend) = memory_worker(1, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        // Bytes appear at a key the model says does not exist.
        backend.put_raw("b1", "ov0100000000", Bytes::from(vec![0u8; DATA_UNIT_SIZE]));
        let err = worker.put(&token).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedObject { .. }), "{err}");
    }

    #[tokio::test]
    async fn get_validates_and_counts() {
        let (mut worker, backend) = memory_worker(1, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        // Nothing exists yet: a no-op.
        worker.get(&token).await.unwrap();
        assert_eq!(worker.stat.get_count(), 0);

        put_until_registered(&mut worker, &token).await;
        worker.get(&token).await.unwrap();
        assert_eq!(worker.stat.get_count(), 1);
    }

    #[tokio::test]
    async fn corrupted_body_fails_get_and_cancellation_masks_it() {
        let (mut worker, backend) = memory_worker(1, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        let key = put_until_registered(&mut worker, &token).await;
        let mut tampered = backend.raw_object("b1", &key).unwrap().to_vec();
        tampered[0] ^= 0xff;
        backend.put_raw("b1", &key, Bytes::from(tampered));

        let err = worker.get(&token).await.unwrap_err();
        assert!(matches!(err, Error::DataCorruption { .. }), "{err}");

        token.cancel();
        worker.get(&token).await.unwrap();
    }

    #[tokio::test]
    async fn delete_round_trip_clears_the_model() {
        let (mut worker, backend) = memory_worker(1, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        // Nothing exists yet: a no-op.
        worker.delete(&token).await.unwrap();
        assert_eq!(worker.stat.delete_count(), 0);

        let key = put_until_registered(&mut worker, &token).await;
        worker.delete(&token).await.unwrap();

        assert!(backend.raw_object("b1", &key).is_none());
        assert!(!worker.buckets[0].object_meta.exist(&key));
        let obj = worker.buckets[0].object_meta.object(0);
        assert_eq!(obj.size, 0);
        assert_eq!(obj.write_count, 0);
        assert_eq!(worker.stat.delete_count(), 1);
    }

    #[tokio::test]
    async fn list_matches_the_existing_set() {
        let (mut worker, backend) = memory_worker(4, &["b1"]);
        backend.create_bucket("b1").await.unwrap();
        let token = CancellationToken::new();

        for _ in 0..8 {
            worker.put(&token).await.unwrap();
        }
        worker.list(&token).await.unwrap();
        assert_eq!(worker.stat.list_count(), 1);

        // A stray key under the worker's prefix breaks both count and
        // membership.
        backend.put_raw("b1", "ov01000000ff", Bytes::from_static(b"stray"));
        let err = worker.list(&token).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedObject { .. }), "{err}");
    }

    #[tokio::test]
    async fn operations_pick_among_all_buckets() {
        let (mut worker, backend) = memory_worker(1, &["b1", "b2"]);
        backend.create_bucket("b1").await.unwrap();
        backend.create_bucket("b2").await.unwrap();
        let token = CancellationToken::new();

        for _ in 0..32 {
            worker.put(&token).await.unwrap();
        }
        let in_b1 = backend.raw_object("b1", "ov0100000000").is_some();
        let in_b2 = backend.raw_object("b2", "ov0100000000").is_some();
        assert!(in_b1 && in_b2, "32 puts landed in only one bucket");
    }
}
