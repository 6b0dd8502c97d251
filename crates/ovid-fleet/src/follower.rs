//! The follower control server.
//!
//! One process runs one workload at a time, driven over HTTP:
//!
//! | Endpoint | Effect |
//! |---|---|
//! | `POST /start` | Stopped → Running; spawns the workload and the watchdog |
//! | `GET /result` | 204 while not Stopped, else plaintext "OK" or the error |
//! | `POST /cancel` | Running → Cancelling; cancels the workload token |
//!
//! `/start` is idempotent while Running. Every `/result` poll bumps a
//! counter the watchdog reads: if no poll arrives for one full tick the
//! leader is presumed dead and the workload is cancelled internally.
//!
//! All session state lives in one [`FollowerSession`] value behind a
//! single mutex, shared with every handler.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use ovid_core::error::{Error, Result};
use ovid_core::s3::S3Backend;
use ovid_workload::Runner;

use crate::protocol::StartFollowerParameter;

/// Seconds between watchdog checks of the leader's `/result` polls.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(3);

/// How long a shutting-down process waits for the workload to stop.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SHUTDOWN_POLL_LIMIT: u32 = 40;

/// The workload a follower launches on `/start`.
///
/// Production followers run the S3 runner; tests substitute stubs to
/// exercise the control protocol in isolation.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Runs the workload to completion or until `token` is cancelled.
    async fn run(&self, param: StartFollowerParameter, token: CancellationToken) -> Result<()>;
}

/// The production workload: an S3-backed [`Runner`] built from the start
/// parameters.
pub struct RunnerWorkload {
    ca_cert: Option<PathBuf>,
}

impl RunnerWorkload {
    /// Creates the production workload, optionally trusting an extra CA
    /// certificate for the storage endpoint.
    #[must_use]
    pub fn new(ca_cert: Option<PathBuf>) -> Self {
        Self { ca_cert }
    }
}

#[async_trait]
impl Workload for RunnerWorkload {
    async fn run(&self, param: StartFollowerParameter, token: CancellationToken) -> Result<()> {
        let endpoint = (!param.context.endpoint.is_empty()).then(|| param.context.endpoint.clone());
        let storage = S3Backend::connect(
            endpoint.as_deref(),
            self.ca_cert.as_deref(),
            param.multipart_thresh,
        )
        .await?;
        let mut runner = Runner::new(
            param.context,
            &param.ope_ratio,
            param.time_in_ms,
            param.id,
            false,
            Arc::new(storage),
        )?;
        runner.init_buckets().await?;
        runner.run(token).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkloadState {
    Stopped,
    Running,
    Cancelling,
}

struct SessionInner {
    state: WorkloadState,
    /// Error text of the finished workload; `None` means success.
    result: Option<String>,
    cancel: Option<CancellationToken>,
    shutting_down: bool,
}

/// Process-wide follower state: the workload lifecycle behind one mutex
/// plus the watchdog poll counter.
pub struct FollowerSession {
    inner: Mutex<SessionInner>,
    polls: AtomicU64,
    workload: Arc<dyn Workload>,
    watchdog_interval: Duration,
}

impl FollowerSession {
    /// Creates a session around the given workload.
    #[must_use]
    pub fn new(workload: Arc<dyn Workload>) -> Self {
        Self::with_watchdog_interval(workload, WATCHDOG_INTERVAL)
    }

    /// Creates a session with a custom watchdog tick, for tests.
    #[must_use]
    pub fn with_watchdog_interval(workload: Arc<dyn Workload>, interval: Duration) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: WorkloadState::Stopped,
                result: None,
                cancel: None,
                shutting_down: false,
            }),
            polls: AtomicU64::new(0),
            workload,
            watchdog_interval: interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels a running workload. A no-op in any other state.
    pub fn cancel_workload(&self) {
        let mut inner = self.lock();
        if inner.state != WorkloadState::Running {
            tracing::info!(state = ?inner.state, "workload is not running; nothing to cancel");
            return;
        }
        if let Some(token) = &inner.cancel {
            token.cancel();
        }
        inner.state = WorkloadState::Cancelling;
        tracing::info!("cancelled the workload");
    }

    /// Stops accepting new `/start` requests.
    fn refuse_new_starts(&self) {
        self.lock().shutting_down = true;
    }

    fn is_stopped(&self) -> bool {
        self.lock().state == WorkloadState::Stopped
    }
}

/// Builds the follower control router.
pub fn router(session: Arc<FollowerSession>) -> Router {
    Router::new()
        .route("/start", post(start_handler))
        .route("/result", get(result_handler))
        .route("/cancel", post(cancel_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

async fn start_handler(
    State(session): State<Arc<FollowerSession>>,
    body: Bytes,
) -> StatusCode {
    tracing::info!("received a start request");
    let param: StartFollowerParameter = match serde_json::from_slice(&body) {
        Ok(param) => param,
        Err(error) => {
            tracing::error!(%error, "failed to parse start parameters");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    let token = CancellationToken::new();
    {
        let mut inner = session.lock();
        if inner.shutting_down {
            tracing::warn!("refusing start: the follower is shutting down");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        match inner.state {
            WorkloadState::Running => {
                // Idempotent while running.
                tracing::info!("workload is already running");
                return StatusCode::OK;
            }
            WorkloadState::Cancelling => {
                tracing::warn!("refusing start: a cancellation is still in flight");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            WorkloadState::Stopped => {}
        }
        inner.state = WorkloadState::Running;
        inner.result = None;
        inner.cancel = Some(token.clone());
    }
    session.polls.store(0, Ordering::Relaxed);

    tracing::info!(
        follower_id = param.id,
        time_in_ms = param.time_in_ms,
        multipart_thresh = param.multipart_thresh,
        num_obj = param.context.num_obj,
        num_worker = param.context.num_worker,
        buckets = ?param.context.bucket_names,
        "starting workload"
    );

    spawn_workload(Arc::clone(&session), param, token.clone());
    spawn_watchdog(Arc::clone(&session), token);
    StatusCode::OK
}

fn spawn_workload(
    session: Arc<FollowerSession>,
    param: StartFollowerParameter,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let result = session.workload.run(param, token.clone()).await;
        {
            let mut inner = session.lock();
            let was_cancelling = inner.state == WorkloadState::Cancelling;
            inner.state = WorkloadState::Stopped;
            inner.cancel = None;
            inner.result = match result {
                Err(error) => {
                    tracing::error!(%error, "workload failed");
                    Some(error.to_string())
                }
                Ok(()) if was_cancelling => Some(Error::Cancelled.to_string()),
                Ok(()) => None,
            };
        }
        // Releases the watchdog once the workload reaches a terminal state.
        token.cancel();
    });
}

fn spawn_watchdog(session: Arc<FollowerSession>, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(session.watchdog_interval);
        ticker.tick().await; // the immediate first tick
        let mut previous = session.polls.load(Ordering::Relaxed);
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                _ = ticker.tick() => {
                    if session.lock().state != WorkloadState::Running {
                        return;
                    }
                    let current = session.polls.load(Ordering::Relaxed);
                    if current == previous {
                        tracing::warn!(
                            "no result polls from the leader for a full watchdog tick; \
                             cancelling the workload"
                        );
                        session.cancel_workload();
                        return;
                    }
                    previous = current;
                }
            }
        }
    });
}

async fn result_handler(State(session): State<Arc<FollowerSession>>) -> Response {
    session.polls.fetch_add(1, Ordering::Relaxed);
    let inner = session.lock();
    if inner.state != WorkloadState::Stopped {
        return StatusCode::NO_CONTENT.into_response();
    }
    match &inner.result {
        Some(text) => text.clone().into_response(),
        None => crate::protocol::SUCCESS_MESSAGE.into_response(),
    }
}

async fn cancel_handler(State(session): State<Arc<FollowerSession>>, _body: Bytes) -> StatusCode {
    tracing::info!("received a cancel request");
    session.cancel_workload();
    StatusCode::OK
}

/// Serves the follower control endpoints until SIGINT/SIGTERM.
///
/// On a signal the server refuses new starts, cancels any running
/// workload, waits (bounded) for it to reach a terminal state, and shuts
/// the listener down cleanly.
///
/// # Errors
///
/// Returns [`Error::Transport`] when the listener cannot be bound or the
/// server fails.
pub async fn serve(port: u16, session: Arc<FollowerSession>) -> Result<()> {
    let app = router(Arc::clone(&session));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::transport_with_source(format!("failed to bind port {port}"), e))?;
    tracing::info!(port, "follower server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_after_signal(session))
        .await
        .map_err(|e| Error::transport_with_source("follower server failed", e))
}

async fn shutdown_after_signal(session: Arc<FollowerSession>) {
    wait_for_signal().await;
    tracing::info!("shutdown signal received; draining the workload");
    session.refuse_new_starts();
    session.cancel_workload();
    for _ in 0..SHUTDOWN_POLL_LIMIT {
        if session.is_stopped() {
            break;
        }
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install the SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
