//! The leader client.
//!
//! The leader starts every follower sequentially, then polls all
//! `/result` endpoints concurrently. The first follower that fails (or
//! cannot be reached) triggers a single broadcast `/cancel` to the whole
//! fleet; the run succeeds only when every follower reports "OK".

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use ovid_core::error::{Error, Result};
use ovid_workload::ExecutionContext;

use crate::protocol::{StartFollowerParameter, SUCCESS_MESSAGE};

/// Delay between consecutive `/result` polls of one follower.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of a fleet run.
#[derive(Debug)]
pub struct LeaderReport {
    /// True when every follower reported "OK".
    pub success: bool,
    /// Follower URL → final `/result` body. Followers that could not be
    /// reached have no entry.
    pub reports: BTreeMap<String, String>,
}

/// HTTP client that orchestrates a follower fleet.
pub struct Leader {
    client: reqwest::Client,
    followers: Vec<String>,
}

impl Leader {
    /// Creates a leader for the given follower URLs, optionally trusting
    /// an extra CA certificate for HTTPS followers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty or malformed follower
    /// list or an unreadable certificate.
    pub fn new(followers: Vec<String>, ca_cert: Option<&Path>) -> Result<Self> {
        if followers.is_empty() || followers.iter().any(String::is_empty) {
            return Err(Error::InvalidInput(format!(
                "invalid follower list: {followers:?}"
            )));
        }

        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(path) = ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                Error::InvalidInput(format!(
                    "failed to read CA certificate {}: {e}",
                    path.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::InvalidInput(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| Error::transport_with_source("failed to build the HTTP client", e))?;

        Ok(Self { client, followers })
    }

    /// Sends `/start` to every follower in order. Follower `i` is
    /// assigned ID `i`, which partitions the keyspace across the fleet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on the first follower that does not
    /// accept the start; the caller should then cancel the fleet.
    pub async fn start_followers(
        &self,
        context: &ExecutionContext,
        ope_ratio: &[f64],
        time_in_ms: u64,
        multipart_thresh: usize,
    ) -> Result<()> {
        for (index, follower) in self.followers.iter().enumerate() {
            let param = StartFollowerParameter {
                id: index as u32,
                context: context.clone(),
                ope_ratio: ope_ratio.to_vec(),
                time_in_ms,
                multipart_thresh,
            };
            let response = self
                .client
                .post(endpoint(follower, "start"))
                .json(&param)
                .send()
                .await
                .map_err(|e| {
                    Error::transport_with_source(format!("failed to start {follower}"), e)
                })?;
            if response.status() != reqwest::StatusCode::OK {
                return Err(Error::transport(format!(
                    "follower {follower} rejected the start (status = {})",
                    response.status()
                )));
            }
            tracing::info!(follower = %follower, id = index, "follower started");
        }
        Ok(())
    }

    /// Polls every follower until it reports, cancelling the whole fleet
    /// (once) as soon as any follower fails or is unreachable.
    pub async fn collect_results(&self) -> LeaderReport {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut join_set = JoinSet::new();
        for follower in self.followers.clone() {
            let client = self.client.clone();
            let followers = self.followers.clone();
            let cancelled = Arc::clone(&cancelled);
            join_set.spawn(async move {
                let outcome = poll_result(&client, &follower).await;
                let failed = !matches!(&outcome, Ok(text) if text == SUCCESS_MESSAGE);
                if failed && !cancelled.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        follower = %follower,
                        "follower failed; cancelling the whole fleet"
                    );
                    broadcast_cancel(&client, &followers).await;
                }
                (follower, outcome)
            });
        }

        let mut success = true;
        let mut reports = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((follower, Ok(text))) => {
                    if text != SUCCESS_MESSAGE {
                        success = false;
                    }
                    reports.insert(follower, text);
                }
                Ok((follower, Err(error))) => {
                    tracing::error!(follower = %follower, %error, "failed to collect a result");
                    success = false;
                }
                Err(join_error) => {
                    tracing::error!(%join_error, "result collection task died");
                    success = false;
                }
            }
        }
        LeaderReport { success, reports }
    }

    /// Broadcasts `/cancel` to every follower, logging failures.
    pub async fn cancel_all(&self) {
        broadcast_cancel(&self.client, &self.followers).await;
    }
}

async fn poll_result(client: &reqwest::Client, follower: &str) -> Result<String> {
    loop {
        let response = client
            .get(endpoint(follower, "result"))
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(format!("failed to poll {follower}"), e)
            })?;
        match response.status() {
            reqwest::StatusCode::OK => {
                return response.text().await.map_err(|e| {
                    Error::transport_with_source(
                        format!("failed to read the result body of {follower}"),
                        e,
                    )
                });
            }
            reqwest::StatusCode::NO_CONTENT => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            status => {
                return Err(Error::transport(format!(
                    "unexpected status {status} while polling {follower}"
                )));
            }
        }
    }
}

async fn broadcast_cancel(client: &reqwest::Client, followers: &[String]) {
    for follower in followers {
        let outcome = client
            .post(endpoint(follower, "cancel"))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .send()
            .await;
        match outcome {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                tracing::info!(follower = %follower, "follower cancelled");
            }
            Ok(response) => {
                tracing::error!(
                    follower = %follower,
                    status = %response.status(),
                    "cancel was rejected"
                );
            }
            Err(error) => {
                tracing::error!(follower = %follower, %error, "failed to send cancel");
            }
        }
    }
}

fn endpoint(follower: &str, path: &str) -> String {
    format!("{}/{path}", follower.trim_end_matches('/'))
}
