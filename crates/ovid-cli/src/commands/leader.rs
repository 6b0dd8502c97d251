//! The `leader` subcommand: fan a workload out to a follower fleet.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use ovid_fleet::Leader;

use crate::args;
use crate::LeaderArgs;

/// JSON config file accepted by `--config`.
#[derive(Debug, Deserialize)]
struct LeaderConfig {
    #[serde(rename = "FollowerList")]
    follower_list: Vec<String>,
}

/// Runs the leader: start every follower, poll the results, cancel the
/// fleet on the first failure.
///
/// # Errors
///
/// Fails on invalid flags, an unreachable follower, or any follower
/// reporting a failed workload.
pub async fn execute(leader_args: &LeaderArgs) -> Result<()> {
    let workload = &leader_args.workload;
    let ope_ratio = args::parse_ope_ratio(&workload.ope_ratio)?;
    let multipart_thresh = args::parse_multipart_thresh(&workload.multipart_thresh)?;
    let time = args::parse_duration(&workload.time)?;
    super::workload::check_cacert(workload.cacert.as_deref())?;

    let follower_list = match &leader_args.config {
        Some(path) => parse_config(path)?,
        None => leader_args.follower_list.clone(),
    };

    let context = super::workload::build_context(workload)?;
    let leader = Leader::new(follower_list, workload.cacert.as_deref())?;

    let time_in_ms = u64::try_from(time.as_millis()).context("duration overflow")?;
    if let Err(err) = leader
        .start_followers(&context, &ope_ratio, time_in_ms, multipart_thresh)
        .await
    {
        tracing::error!(error = %err, "failed to start the fleet; cancelling");
        leader.cancel_all().await;
        return Err(err.into());
    }
    tracing::info!("sent start requests to all followers");

    let report = leader.collect_results().await;
    for (follower, text) in &report.reports {
        tracing::info!(follower = %follower, report = %text, "follower report");
    }
    if !report.success {
        bail!("some follower workloads failed");
    }
    Ok(())
}

fn parse_config(path: &Path) -> Result<Vec<String>> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: LeaderConfig = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config.follower_list)
}
