//! # ovid-workload
//!
//! The operation engine of the ovid validation workload: the persistable
//! execution context, the per-worker operation state machine, and the
//! runner that drives N workers against a storage backend under a
//! deadline.
//!
//! Every worker owns its slice of the keyspace exclusively, so the engine
//! needs no locks between workers; the only shared state is the atomic
//! statistics and the storage client.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod context;
pub mod runner;
pub mod worker;

pub use context::{BucketWithObject, ExecutionContext, WorkerState};
pub use runner::Runner;
pub use worker::Worker;
