//! Wire types of the leader/follower control protocol.

use serde::{Deserialize, Serialize};

use ovid_workload::ExecutionContext;

/// The `/result` body a follower returns after a clean run.
pub const SUCCESS_MESSAGE: &str = "OK";

/// Body of the leader's `POST /start` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFollowerParameter {
    /// Per-follower index assigned by the leader; doubles as the
    /// follower's process ID in the keyspace partition.
    #[serde(rename = "ID")]
    pub id: u32,
    /// The execution context the follower should run.
    #[serde(rename = "Context")]
    pub context: ExecutionContext,
    /// Normalized put/get/delete/list weights.
    #[serde(rename = "OpeRatio")]
    pub ope_ratio: Vec<f64>,
    /// Workload duration in milliseconds; 0 runs until cancelled.
    #[serde(rename = "TimeInMs")]
    pub time_in_ms: u64,
    /// Byte size above which PUT switches to multipart upload.
    #[serde(rename = "MultipartThresh")]
    pub multipart_thresh: usize,
}
