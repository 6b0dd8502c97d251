//! Leader orchestration against a real two-follower fleet.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::middleware::Next;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use ovid_core::error::{Error, Result};
use ovid_fleet::follower::{router, FollowerSession, Workload};
use ovid_fleet::leader::Leader;
use ovid_fleet::protocol::StartFollowerParameter;
use ovid_workload::ExecutionContext;

/// Succeeds immediately.
struct SucceedingWorkload;

#[async_trait]
impl Workload for SucceedingWorkload {
    async fn run(&self, _param: StartFollowerParameter, _token: CancellationToken) -> Result<()> {
        Ok(())
    }
}

/// Fails after a delay, long enough for the other follower to report.
struct FailingWorkload {
    delay: Duration,
}

#[async_trait]
impl Workload for FailingWorkload {
    async fn run(&self, _param: StartFollowerParameter, token: CancellationToken) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(self.delay) => Err(Error::DataCorruption {
                report: "- write count is wrong (expected = 2, actual = 1)".to_string(),
            }),
            () = token.cancelled() => Ok(()),
        }
    }
}

/// Boots a follower server and counts the `/cancel` requests it receives.
async fn spawn_follower(
    workload: Arc<dyn Workload>,
) -> (String, Arc<AtomicU32>, oneshot::Sender<()>) {
    let session = Arc::new(FollowerSession::new(workload));
    let cancel_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&cancel_count);
    let app = router(session).layer(axum::middleware::from_fn(
        move |request: Request, next: Next| {
            let counter = Arc::clone(&counter);
            async move {
                if request.uri().path() == "/cancel" {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                next.run(request).await
            }
        },
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        server.await.expect("server");
    });
    (format!("http://{addr}"), cancel_count, shutdown_tx)
}

fn fleet_context() -> ExecutionContext {
    ExecutionContext {
        endpoint: "http://127.0.0.1:9000".to_string(),
        bucket_names: vec!["b1".to_string()],
        num_obj: 8,
        num_worker: 2,
        min_size: 256,
        max_size: 1024,
        start_worker_id: 0,
        workers: Vec::new(),
    }
}

#[tokio::test]
async fn first_failure_cancels_the_fleet_exactly_once() {
    let (ok_url, ok_cancels, _shutdown_ok) = spawn_follower(Arc::new(SucceedingWorkload)).await;
    let (bad_url, bad_cancels, _shutdown_bad) = spawn_follower(Arc::new(FailingWorkload {
        delay: Duration::from_millis(1500),
    }))
    .await;

    let leader = Leader::new(vec![ok_url.clone(), bad_url.clone()], None).expect("leader");
    leader
        .start_followers(&fleet_context(), &[0.25, 0.25, 0.25, 0.25], 0, 100 << 20)
        .await
        .expect("start");

    let report = leader.collect_results().await;
    assert!(!report.success, "a failing follower must fail the run");
    assert_eq!(report.reports.len(), 2);
    assert_eq!(report.reports[&ok_url], "OK");
    assert!(
        report.reports[&bad_url].contains("data corruption"),
        "unexpected report: {}",
        report.reports[&bad_url]
    );

    assert_eq!(ok_cancels.load(Ordering::SeqCst), 1, "one broadcast cancel");
    assert_eq!(bad_cancels.load(Ordering::SeqCst), 1, "one broadcast cancel");
}

#[tokio::test]
async fn all_ok_fleet_succeeds_without_cancels() {
    let (url_a, cancels_a, _shutdown_a) = spawn_follower(Arc::new(SucceedingWorkload)).await;
    let (url_b, cancels_b, _shutdown_b) = spawn_follower(Arc::new(SucceedingWorkload)).await;

    let leader = Leader::new(vec![url_a.clone(), url_b.clone()], None).expect("leader");
    leader
        .start_followers(&fleet_context(), &[0.25, 0.25, 0.25, 0.25], 0, 100 << 20)
        .await
        .expect("start");

    let report = leader.collect_results().await;
    assert!(report.success);
    assert_eq!(report.reports[&url_a], "OK");
    assert_eq!(report.reports[&url_b], "OK");
    assert_eq!(cancels_a.load(Ordering::SeqCst), 0);
    assert_eq!(cancels_b.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_follower_fails_the_start_fanout() {
    let (ok_url, _cancels, _shutdown) = spawn_follower(Arc::new(SucceedingWorkload)).await;
    // Nothing listens on the second URL.
    let leader = Leader::new(
        vec![ok_url, "http://127.0.0.1:1".to_string()],
        None,
    )
    .expect("leader");

    let err = leader
        .start_followers(&fleet_context(), &[0.25, 0.25, 0.25, 0.25], 0, 100 << 20)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport { .. }), "{err}");
}
