//! Follower control-server behavior against a real listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use ovid_core::error::{Error, Result};
use ovid_fleet::follower::{router, FollowerSession, Workload};
use ovid_fleet::protocol::StartFollowerParameter;
use ovid_workload::ExecutionContext;

/// A workload that finishes only when told to (or when cancelled).
struct ControlledWorkload {
    finish: Arc<Notify>,
}

#[async_trait]
impl Workload for ControlledWorkload {
    async fn run(&self, _param: StartFollowerParameter, token: CancellationToken) -> Result<()> {
        tokio::select! {
            () = self.finish.notified() => Ok(()),
            () = token.cancelled() => Ok(()),
        }
    }
}

/// A workload that runs until cancelled.
struct BlockingWorkload;

#[async_trait]
impl Workload for BlockingWorkload {
    async fn run(&self, _param: StartFollowerParameter, token: CancellationToken) -> Result<()> {
        token.cancelled().await;
        Ok(())
    }
}

async fn spawn_server(session: Arc<FollowerSession>) -> (String, oneshot::Sender<()>) {
    let app = router(session);
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
    (format!("http://{addr}"), shutdown_tx)
}

fn start_body() -> String {
    let param = StartFollowerParameter {
        id: 0,
        context: ExecutionContext::default(),
        ope_ratio: vec![1.0, 0.0, 0.0, 0.0],
        time_in_ms: 0,
        multipart_thresh: 100 << 20,
    };
    serde_json::to_string(&param).expect("encode")
}

async fn final_result(client: &reqwest::Client, base: &str) -> String {
    for _ in 0..100 {
        let response = client
            .get(format!("{base}/result"))
            .send()
            .await
            .expect("poll result");
        if response.status() == reqwest::StatusCode::OK {
            return response.text().await.expect("body");
        }
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("workload never reached a terminal state");
}

#[tokio::test]
async fn start_is_idempotent_and_result_follows_the_state_machine() {
    let finish = Arc::new(Notify::new());
    let session = Arc::new(FollowerSession::new(Arc::new(ControlledWorkload {
        finish: Arc::clone(&finish),
    })));
    let (base, _shutdown) = spawn_server(session).await;
    let client = reqwest::Client::new();

    // Wrong methods are rejected outright.
    let response = client.get(format!("{base}/start")).send().await.expect("get start");
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    let response = client.post(format!("{base}/result")).send().await.expect("post result");
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);

    // A garbage body never transitions the machine.
    let response = client
        .post(format!("{base}/start"))
        .body("{broken")
        .send()
        .await
        .expect("bad start");
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    // Two starts in a row both succeed while the workload runs.
    for _ in 0..2 {
        let response = client
            .post(format!("{base}/start"))
            .body(start_body())
            .send()
            .await
            .expect("start");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    // Still running: no content.
    let response = client.get(format!("{base}/result")).send().await.expect("result");
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    finish.notify_one();
    assert_eq!(final_result(&client, &base).await, "OK");
}

#[tokio::test]
async fn cancel_stops_the_workload_and_is_reported() {
    let session = Arc::new(FollowerSession::new(Arc::new(BlockingWorkload)));
    let (base, _shutdown) = spawn_server(session).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/start"))
        .body(start_body())
        .send()
        .await
        .expect("start");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = client.post(format!("{base}/cancel")).send().await.expect("cancel");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let text = final_result(&client, &base).await;
    assert_eq!(text, Error::Cancelled.to_string());
}

#[tokio::test]
async fn cancel_while_stopped_is_a_no_op() {
    let session = Arc::new(FollowerSession::new(Arc::new(BlockingWorkload)));
    let (base, _shutdown) = spawn_server(session).await;
    let client = reqwest::Client::new();

    let response = client.post(format!("{base}/cancel")).send().await.expect("cancel");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Never started: the machine is still Stopped with an empty (OK) result.
    let response = client.get(format!("{base}/result")).send().await.expect("result");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.expect("body"), "OK");
}

#[tokio::test]
async fn watchdog_cancels_when_result_polls_stop() {
    let session = Arc::new(FollowerSession::with_watchdog_interval(
        Arc::new(BlockingWorkload),
        Duration::from_millis(300),
    ));
    let (base, _shutdown) = spawn_server(session).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/start"))
        .body(start_body())
        .send()
        .await
        .expect("start");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // No /result polls at all: the watchdog must conclude the leader is
    // gone and cancel the workload on its own.
    tokio::time::sleep(Duration::from_millis(900)).await;

    let text = final_result(&client, &base).await;
    assert_eq!(text, Error::Cancelled.to_string());
}

#[tokio::test]
async fn watchdog_stays_quiet_while_polls_arrive() {
    let session = Arc::new(FollowerSession::with_watchdog_interval(
        Arc::new(BlockingWorkload),
        Duration::from_millis(300),
    ));
    let (base, _shutdown) = spawn_server(session).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/start"))
        .body(start_body())
        .send()
        .await
        .expect("start");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Steady polling keeps the workload alive across several ticks.
    for _ in 0..10 {
        let response = client.get(format!("{base}/result")).send().await.expect("result");
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let response = client.post(format!("{base}/cancel")).send().await.expect("cancel");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(final_result(&client, &base).await, Error::Cancelled.to_string());
}
