//! The persistable execution context.
//!
//! A run can be saved to a JSON file and resumed later: the context holds
//! everything the runner needs to reconstruct its workers, including each
//! registry's existing-object list. The worker ID seed is preserved so the
//! worker IDs embedded in already-stored bytes keep matching on resume.

use std::path::Path;

use serde::{Deserialize, Serialize};

use ovid_core::error::{Error, Result};
use ovid_core::object::ObjectMeta;

/// Everything needed to reconstruct a run: endpoint, bucket set, object
/// counts, size range, the worker ID seed, and per-worker registry state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Endpoint URL; empty means the ambient AWS configuration.
    pub endpoint: String,
    /// Buckets the workload touches.
    #[serde(rename = "bucketNames")]
    pub bucket_names: Vec<String>,
    /// Total number of objects for this process.
    #[serde(rename = "numObj")]
    pub num_obj: usize,
    /// Number of concurrent workers.
    #[serde(rename = "numWorker")]
    pub num_worker: usize,
    /// Minimum object size in bytes.
    #[serde(rename = "minSize")]
    pub min_size: usize,
    /// Maximum object size in bytes.
    #[serde(rename = "maxSize")]
    pub max_size: usize,
    /// Seed of the worker ID sequence; worker `i` gets
    /// `(startWorkerID + i) mod 2^16`.
    #[serde(rename = "startWorkerID")]
    pub start_worker_id: u16,
    /// Per-worker registry state, in worker order.
    #[serde(default)]
    pub workers: Vec<WorkerState>,
}

impl ExecutionContext {
    /// Loads a context from a JSON file written by [`ExecutionContext::save`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the file cannot be read and
    /// [`Error::Serialization`] when it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            Error::InvalidInput(format!("failed to read context file {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&data).map_err(|e| Error::Serialization {
            message: format!("failed to parse context file {}: {e}", path.display()),
        })
    }

    /// Writes the context as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when encoding fails and
    /// [`Error::Internal`] when the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self).map_err(|e| Error::Serialization {
            message: format!("failed to encode context: {e}"),
        })?;
        std::fs::write(path, data).map_err(|e| {
            Error::internal(format!("failed to write context file {}: {e}", path.display()))
        })
    }
}

/// The persistable slice of one worker: its registries, one per bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerState {
    /// One registry per bucket, in bucket order.
    #[serde(rename = "bucketsWithObject")]
    pub buckets_with_object: Vec<BucketWithObject>,
}

/// A bucket paired with the worker's object registry for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketWithObject {
    /// The bucket name.
    #[serde(rename = "bucketName")]
    pub bucket_name: String,
    /// The worker's registry of objects in this bucket.
    #[serde(rename = "objectMeta")]
    pub object_meta: ObjectMeta,
}
