//! # ovid-core
//!
//! Core primitives for the ovid storage validation workload.
//!
//! This crate provides the foundational types used across all ovid
//! components:
//!
//! - **Payload codec**: self-describing 256-byte data units that embed the
//!   identity every object is expected to carry
//! - **Object registry**: the per-worker model of which keys exist remotely
//!   and in which generation
//! - **Size sampler**: skewed random object sizes aligned to the data unit
//! - **Statistics**: atomic operation counters shared across workers
//! - **Storage backends**: the narrow object-store contract, an in-memory
//!   backend for tests, and the S3 backend used against real endpoints
//! - **Error types**: the shared error taxonomy and result alias
//!
//! ## Crate boundary
//!
//! `ovid-core` is the only crate allowed to define shared primitives.
//! The workload, fleet, and CLI crates build on the contracts defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod data_unit;
pub mod error;
pub mod object;
pub mod observability;
pub mod s3;
pub mod sampler;
pub mod stat;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::object::{Object, ObjectMeta};
    pub use crate::stat::Stat;
    pub use crate::storage::{MemoryBackend, ObjectReader, ObjectStore};
}
