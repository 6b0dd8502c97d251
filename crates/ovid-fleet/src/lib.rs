//! # ovid-fleet
//!
//! Distributed coordination for ovid workloads: one leader process fans a
//! workload out to many follower processes, polls their results, and
//! cancels the fleet on the first failure.
//!
//! Each follower exposes three HTTP endpoints (`/start`, `/result`,
//! `/cancel`) and runs its workload locally. The `/result` polls double as
//! a leader liveness signal: a follower whose polls stop arriving assumes
//! the leader is gone and cancels itself.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod follower;
pub mod leader;
pub mod protocol;

pub use follower::{FollowerSession, RunnerWorkload, Workload};
pub use leader::{Leader, LeaderReport};
pub use protocol::{StartFollowerParameter, SUCCESS_MESSAGE};
