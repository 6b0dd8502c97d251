//! The `follower` subcommand: serve the HTTP control endpoints.

use std::sync::Arc;

use anyhow::{bail, Result};

use ovid_fleet::follower::{serve, RunnerWorkload};
use ovid_fleet::FollowerSession;

use crate::FollowerArgs;

/// Serves the follower until SIGINT/SIGTERM.
///
/// # Errors
///
/// Fails on an invalid port, a missing CA certificate file, or a server
/// failure.
pub async fn execute(args: &FollowerArgs) -> Result<()> {
    if args.follower_port == 0 {
        bail!("invalid follower port: {}", args.follower_port);
    }
    super::workload::check_cacert(args.cacert.as_deref())?;

    let workload = Arc::new(RunnerWorkload::new(args.cacert.clone()));
    let session = Arc::new(FollowerSession::new(workload));
    serve(args.follower_port, session).await?;
    Ok(())
}
