//! WebSocket client connection state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Privilege held by a connection. Starts as `Viewer`; may move to
/// `Controller` once and never back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Role {
    /// Receives broadcasts only.
    #[default]
    Viewer,
    /// May change pages.
    Controller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Viewer => write!(f, "viewer"),
            Self::Controller => write!(f, "controller"),
        }
    }
}

/// Why a frame could not be queued for a connection.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The outbound queue is full; the peer is not keeping up.
    #[error("outbound queue full")]
    QueueFull,
    /// The connection's writer has stopped.
    #[error("connection closed")]
    Closed,
}

/// A registered participant as seen by the hub.
///
/// Outbound frames go through a bounded queue drained by the connection's
/// single writer task, which is the only owner of the socket sink. Queued
/// frames therefore never interleave on the wire and are written in the
/// order they were queued.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    /// Send channel to the writer task.
    tx: mpsc::Sender<Arc<str>>,
    /// Cancelled when the connection must shut down.
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Count of frames that could not be queued.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: String, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            tx,
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame without waiting.
    ///
    /// Failures increment the dropped-message counter.
    pub fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        let err = match self.tx.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => DeliveryError::QueueFull,
            Err(TrySendError::Closed(_)) => DeliveryError::Closed,
        };
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        Err(err)
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the connection's tasks to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new("conn_1".into(), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id, "conn_1");
        assert!(!conn.is_closed());
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(Arc::from("hello")).is_ok());
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[test]
    fn send_to_closed_channel_fails() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new("conn_2".into(), tx);
        drop(rx);
        assert_eq!(conn.send(Arc::from("hello")), Err(DeliveryError::Closed));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_full_channel_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new("conn_3".into(), tx);
        assert!(conn.send(Arc::from("msg1")).is_ok());
        assert_eq!(conn.send(Arc::from("msg2")), Err(DeliveryError::QueueFull));
        assert_eq!(conn.send(Arc::from("msg3")), Err(DeliveryError::QueueFull));
        assert_eq!(conn.drop_count(), 2);
    }

    #[tokio::test]
    async fn frames_arrive_in_queue_order() {
        let (conn, mut rx) = make_connection();
        for i in 0..5 {
            assert!(conn.send(Arc::from(format!("msg_{i}"))).is_ok());
        }
        for i in 0..5 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(&*msg, format!("msg_{i}"));
        }
    }

    #[tokio::test]
    async fn close_resolves_waiters() {
        let (conn, _rx) = make_connection();
        let conn = Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        conn.close();
        waiter.await.unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn role_defaults_to_viewer() {
        assert_eq!(Role::default(), Role::Viewer);
        assert_eq!(Role::Controller.to_string(), "controller");
    }
}
