//! The single-process workload mode (root command).

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use ovid_core::s3::S3Backend;
use ovid_workload::{ExecutionContext, Runner};

use crate::args;
use crate::{Cli, WorkloadArgs};

/// Runs the workload in this process.
///
/// # Errors
///
/// Fails on invalid flags or a failed workload; a run interrupted by a
/// signal is a clean exit.
pub async fn execute(cli: &Cli) -> Result<()> {
    let workload = &cli.workload;
    let ope_ratio = args::parse_ope_ratio(&workload.ope_ratio)?;
    let multipart_thresh = args::parse_multipart_thresh(&workload.multipart_thresh)?;
    let time = args::parse_duration(&workload.time)?;

    let save = match &cli.save {
        Some(path) if path.exists() => {
            if !confirm_overwrite(path)? {
                tracing::info!("execution was canceled");
                return Ok(());
            }
            Some(path.clone())
        }
        other => other.clone(),
    };
    check_cacert(workload.cacert.as_deref())?;

    let (context, loaded) = match &cli.load {
        Some(path) => (ExecutionContext::load(path)?, true),
        None => (build_context(workload)?, false),
    };

    let endpoint = (!context.endpoint.is_empty()).then(|| context.endpoint.clone());
    let storage = S3Backend::connect(
        endpoint.as_deref(),
        workload.cacert.as_deref(),
        multipart_thresh,
    )
    .await?;

    let time_in_ms = u64::try_from(time.as_millis()).context("duration overflow")?;
    let mut runner = Runner::new(
        context,
        &ope_ratio,
        time_in_ms,
        0,
        loaded,
        Arc::new(storage),
    )?;

    let token = CancellationToken::new();
    super::cancel_on_signal(token.clone());

    if let Err(err) = runner.init_buckets().await {
        if token.is_cancelled() {
            return Ok(());
        }
        return Err(err.into());
    }
    if let Err(err) = runner.run(token.clone()).await {
        if token.is_cancelled() {
            return Ok(());
        }
        return Err(err.into());
    }

    if let Some(path) = save {
        runner.save_context(&path)?;
        tracing::info!(path = %path.display(), "execution context saved");
    }
    Ok(())
}

/// Builds a fresh execution context from the command line.
pub fn build_context(workload: &WorkloadArgs) -> Result<ExecutionContext> {
    let (min_size, max_size) = args::parse_size(&workload.size)?;
    Ok(ExecutionContext {
        endpoint: workload.endpoint.clone(),
        bucket_names: workload.bucket.clone(),
        num_obj: workload.num_obj,
        num_worker: workload.num_worker,
        min_size,
        max_size,
        start_worker_id: 0,
        workers: Vec::new(),
    })
}

/// Verifies the CA certificate file exists when one was given.
pub fn check_cacert(cacert: Option<&Path>) -> Result<()> {
    if let Some(path) = cacert {
        if !path.exists() {
            bail!("CA certificate file {} does not exist", path.display());
        }
    }
    Ok(())
}

fn confirm_overwrite(path: &Path) -> Result<bool> {
    print!(
        "A file \"{}\" already exists. Are you sure to overwrite it? (y/N) ",
        path.display()
    );
    std::io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read the answer")?;
    Ok(answer.trim() == "y")
}
