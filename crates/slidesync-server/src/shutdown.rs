//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How long tracked tasks get to finish before they are aborted.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fans a single shutdown signal out to the listener, the hub and every
/// session, and tracks session tasks so shutdown can wait for them.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by tasks that must stop on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker for tasks spawned outside our control (WebSocket sessions run
    /// on tasks axum spawns after the upgrade).
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Signal shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait up to `timeout` for `handles` and every
    /// tracked task. Handles still running afterwards are aborted.
    pub async fn graceful_shutdown(
        &self,
        mut handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = handles.len(),
            tracked = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = async {
            let _ = futures::future::join_all(handles.iter_mut()).await;
            self.tracker.wait().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            let stragglers = handles.iter().filter(|h| !h.is_finished()).count();
            warn!(
                stragglers,
                tracked = self.tracker.len(),
                "shutdown timed out after {timeout:?}, aborting"
            );
            for handle in &handles {
                handle.abort();
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
