//! Orchestration of N workers under a deadline.
//!
//! The runner allocates the per-worker keyspace partitions, initializes
//! the target buckets, and drives every worker concurrently until the
//! deadline elapses, the shared token is cancelled, or any worker reports
//! a terminal error. The first error cancels the peers and becomes the
//! final result.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ovid_core::error::{Error, Result};
use ovid_core::object::{ObjectMeta, KEY_SHORT_PREFIX};
use ovid_core::stat::Stat;
use ovid_core::storage::ObjectStore;

use crate::context::{BucketWithObject, ExecutionContext, WorkerState};
use crate::worker::Worker;

/// Worker IDs live in a 16-bit space.
const MAX_WORKER_ID: u32 = 0x10000;

/// Hard cap on objects per process; keeps the 40-bit key ID space intact.
const MAX_NUM_OBJ: usize = 1 << 24;

/// Hard cap on workers per process; the worker tag is one byte.
const MAX_NUM_WORKER: usize = 256;

/// The weighted operation mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Put,
    Get,
    Delete,
    List,
}

/// Drives a set of workers against a storage backend.
pub struct Runner {
    context: ExecutionContext,
    ope_ratio: [f64; 4],
    time_in_ms: u64,
    process_id: u32,
    loaded: bool,
    storage: Arc<dyn ObjectStore>,
    stat: Arc<Stat>,
    workers: Vec<Worker>,
}

impl Runner {
    /// Builds a runner from an execution context.
    ///
    /// When `loaded` is set the context came from a saved file: worker
    /// registries are reused (with their membership sets rebuilt) and the
    /// persisted worker ID seed is preserved so stored bytes keep
    /// validating. Otherwise fresh registries are allocated and a new
    /// seed is drawn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the context violates the
    /// startup caps: the bucket list must be non-empty and the worker and
    /// object counts must fit their ID-space bounds.
    pub fn new(
        mut context: ExecutionContext,
        ope_ratio: &[f64],
        time_in_ms: u64,
        process_id: u32,
        loaded: bool,
        storage: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let ope_ratio = normalize_ratio(ope_ratio)?;
        validate_context(&context, process_id)?;

        let num_worker = context.num_worker;
        let obj_per_worker = context.num_obj / num_worker;
        if context.num_obj % num_worker != 0 {
            tracing::warn!(
                num_obj = context.num_obj,
                num_worker,
                used = obj_per_worker * num_worker,
                "object count is not divisible by the worker count; the remainder is unused"
            );
        }

        let stat = Arc::new(Stat::new());
        let mut workers = Vec::with_capacity(num_worker);

        if loaded {
            if context.workers.len() != num_worker {
                return Err(Error::InvalidInput(format!(
                    "saved context has {} workers, expected {num_worker}",
                    context.workers.len()
                )));
            }
        } else {
            context.start_worker_id = rand::thread_rng().gen_range(0..MAX_WORKER_ID) as u16;
            context.workers = (0..num_worker)
                .map(|worker_index| WorkerState {
                    buckets_with_object: context
                        .bucket_names
                        .iter()
                        .map(|bucket_name| BucketWithObject {
                            bucket_name: bucket_name.clone(),
                            object_meta: ObjectMeta::new(
                                obj_per_worker,
                                key_id_offset(process_id, worker_index),
                            ),
                        })
                        .collect(),
                })
                .collect();
        }

        for (worker_index, mut state) in std::mem::take(&mut context.workers)
            .into_iter()
            .enumerate()
        {
            if loaded {
                for bucket in &mut state.buckets_with_object {
                    bucket.object_meta.tidy_up();
                }
            }
            let id = (u32::from(context.start_worker_id) + worker_index as u32) % MAX_WORKER_ID;
            let worker = Worker::new(
                id as u16,
                context.min_size,
                context.max_size,
                state.buckets_with_object,
                storage.clone(),
                stat.clone(),
            );
            worker.log_key_range();
            workers.push(worker);
        }

        Ok(Self {
            context,
            ope_ratio,
            time_in_ms,
            process_id,
            loaded,
            storage,
            stat,
            workers,
        })
    }

    /// Ensures every target bucket exists and, for a fresh run, clears
    /// this process's own key prefix from it.
    ///
    /// Bucket creation racing with other processes is fine: a conflict is
    /// treated as success.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; a missing bucket while resuming a
    /// saved context is [`Error::InvalidInput`].
    pub async fn init_buckets(&self) -> Result<()> {
        for bucket_name in &self.context.bucket_names {
            match self.storage.head_bucket(bucket_name).await {
                Ok(()) => {
                    if !self.loaded {
                        tracing::info!(bucket = %bucket_name, "clearing bucket");
                        let prefix = format!("{KEY_SHORT_PREFIX}{:02x}", self.process_id);
                        self.storage.clear_bucket(bucket_name, &prefix).await?;
                    }
                }
                Err(err) if err.is_not_found() => {
                    if self.loaded {
                        return Err(Error::InvalidInput(format!(
                            "bucket {bucket_name} not found although a saved context was loaded"
                        )));
                    }
                    tracing::info!(bucket = %bucket_name, "bucket not found; creating");
                    match self.storage.create_bucket(bucket_name).await {
                        Ok(()) => {}
                        Err(err) if err.is_conflict() => {
                            tracing::info!(bucket = %bucket_name, "bucket already exists");
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Runs the workload until the deadline, cancellation, or the first
    /// worker error, which cancels the peers and becomes the result.
    ///
    /// Statistics are reported on exit either way.
    ///
    /// # Errors
    ///
    /// Returns the first terminal worker error.
    pub async fn run(&mut self, token: CancellationToken) -> Result<()> {
        tracing::info!("validation start");
        let deadline =
            (self.time_in_ms > 0).then(|| Instant::now() + Duration::from_millis(self.time_in_ms));

        // Worker errors cancel only this child; the caller's token stays
        // untouched so a signal-driven shutdown remains distinguishable
        // from a failed workload.
        let workload_token = token.child_token();
        let mut join_set = JoinSet::new();
        let mut slots: Vec<Option<Worker>> = Vec::new();
        slots.resize_with(self.workers.len(), || None);

        for (index, mut worker) in std::mem::take(&mut self.workers).into_iter().enumerate() {
            let token = workload_token.clone();
            let ope_ratio = self.ope_ratio;
            join_set.spawn(async move {
                let result = worker_loop(&mut worker, &token, ope_ratio, deadline).await;
                (index, worker, result)
            });
        }

        let mut first_err: Option<Error> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, worker, result)) => {
                    slots[index] = Some(worker);
                    if let Err(err) = result {
                        if first_err.is_none() {
                            tracing::error!(error = %err, "worker failed; cancelling peers");
                            first_err = Some(err);
                        }
                        workload_token.cancel();
                    }
                }
                Err(join_err) => {
                    if first_err.is_none() {
                        first_err = Some(Error::internal(format!("worker task died: {join_err}")));
                    }
                    workload_token.cancel();
                }
            }
        }
        self.workers = slots.into_iter().flatten().collect();

        tracing::info!("validation finished");
        self.stat.report();

        first_err.map_or(Ok(()), Err)
    }

    /// Writes the current execution context to a JSON file.
    ///
    /// # Errors
    ///
    /// Propagates encoding and file system failures.
    pub fn save_context(&self, path: &Path) -> Result<()> {
        let mut context = self.context.clone();
        context.workers = self.workers.iter().map(Worker::state).collect();
        context.save(path)
    }

    /// The shared statistics counters.
    #[must_use]
    pub fn stat(&self) -> &Arc<Stat> {
        &self.stat
    }
}

/// One worker's life: loop until deadline, cancellation, or error.
async fn worker_loop(
    worker: &mut Worker,
    token: &CancellationToken,
    ope_ratio: [f64; 4],
    deadline: Option<Instant>,
) -> Result<()> {
    loop {
        if token.is_cancelled() {
            tracing::debug!(worker_id = format!("{:#06x}", worker.id()), "workload cancelled");
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }
        let operation = select_operation(&ope_ratio, rand::thread_rng().gen());
        match operation {
            Operation::Put => worker.put(token).await?,
            Operation::Get => worker.get(token).await?,
            Operation::Delete => worker.delete(token).await?,
            Operation::List => worker.list(token).await?,
        }
    }
}

/// Cumulative-threshold selection over the normalized operation weights.
fn select_operation(ope_ratio: &[f64; 4], sample: f64) -> Operation {
    if sample < ope_ratio[0] {
        Operation::Put
    } else if sample < ope_ratio[0] + ope_ratio[1] {
        Operation::Get
    } else if sample < ope_ratio[0] + ope_ratio[1] + ope_ratio[2] {
        Operation::Delete
    } else {
        Operation::List
    }
}

fn key_id_offset(process_id: u32, worker_index: usize) -> u64 {
    (u64::from(process_id) << 32) | ((worker_index as u64) << 24)
}

fn normalize_ratio(ope_ratio: &[f64]) -> Result<[f64; 4]> {
    let ratio: [f64; 4] = ope_ratio
        .try_into()
        .map_err(|_| Error::InvalidInput(format!(
            "operation ratio must have 4 entries, got {}",
            ope_ratio.len()
        )))?;
    if ratio.iter().any(|weight| *weight < 0.0 || !weight.is_finite()) {
        return Err(Error::InvalidInput(
            "operation ratio weights must be non-negative".to_string(),
        ));
    }
    let sum: f64 = ratio.iter().sum();
    if sum <= 0.0 {
        return Err(Error::InvalidInput(
            "operation ratio weights must not all be zero".to_string(),
        ));
    }
    Ok(ratio.map(|weight| weight / sum))
}

fn validate_context(context: &ExecutionContext, process_id: u32) -> Result<()> {
    if context.bucket_names.is_empty() {
        return Err(Error::InvalidInput("bucket list is empty".to_string()));
    }
    if context.num_worker == 0 || context.num_worker >= MAX_NUM_WORKER {
        return Err(Error::InvalidInput(format!(
            "worker count must be in [1, {MAX_NUM_WORKER}), got {}",
            context.num_worker
        )));
    }
    if context.num_obj > MAX_NUM_OBJ {
        return Err(Error::InvalidInput(format!(
            "object count must be at most {MAX_NUM_OBJ}, got {}",
            context.num_obj
        )));
    }
    if context.num_obj < context.num_worker {
        return Err(Error::InvalidInput(format!(
            "object count {} must be at least the worker count {}",
            context.num_obj, context.num_worker
        )));
    }
    if process_id >= 256 {
        return Err(Error::InvalidInput(format!(
            "process ID must fit the 2-hex-digit tag, got {process_id}"
        )));
    }
    Ok(())
}
