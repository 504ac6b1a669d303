//! WebSocket session lifecycle: handles a single connected participant from
//! upgrade through disconnect.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Span, debug, field, info, instrument, warn};

use super::connection::{ClientConnection, Role};
use super::dispatcher::Dispatcher;
use super::handler::{SessionAction, SessionController};
use super::hub::{HubError, HubHandle};
use crate::auth::CredentialVerifier;
use crate::metrics::{
    WS_ADMISSION_REJECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_SLOW_CLIENT_EVICTIONS_TOTAL,
};
use crate::protocol::ServerMessage;

/// Everything a session needs from the server.
pub struct SessionContext {
    /// Hub submission handle.
    pub hub: HubHandle,
    /// Used for direct replies, so they share the broadcast queue.
    pub dispatcher: Dispatcher,
    /// Decides controller promotion.
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Outbound queue depth per connection.
    pub outbox_capacity: usize,
    /// Longest a single socket write may take.
    pub send_timeout: Duration,
    /// Cancelled on server shutdown.
    pub shutdown: CancellationToken,
    /// Sessions register here so shutdown can wait for them.
    pub tasks: TaskTracker,
}

/// Run a WebSocket session for a connected participant.
///
/// 1. Registers with the hub (or closes with 1013 when the hub refuses)
/// 2. Spawns the writer task that owns the socket sink
/// 3. Handles inbound frames until the peer leaves, sends something
///    malformed, is evicted, or the server shuts down
/// 4. Submits the disconnect and waits for the writer to finish
#[instrument(skip_all, fields(conn_id = %conn_id, role = tracing::field::Empty))]
pub async fn run_ws_session(ws: WebSocket, conn_id: String, ctx: Arc<SessionContext>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (tx, outbox) = mpsc::channel(ctx.outbox_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), tx));

    if let Err(e) = ctx.hub.connect(connection.clone()).await {
        counter!(WS_ADMISSION_REJECTIONS_TOTAL).increment(1);
        warn!(error = %e, "connection refused by hub");
        let (code, reason) = match e {
            HubError::CapacityExceeded(_) => (close_code::AGAIN, "Too many connections"),
            HubError::Closed => (close_code::AWAY, "Server shutting down"),
        };
        let close = Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        }));
        let _ = ws_tx.send(close).await;
        return;
    }

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    let writer = tokio::spawn(run_writer(
        ws_tx,
        outbox,
        connection.clone(),
        ctx.send_timeout,
    ));

    let mut controller = SessionController::new(ctx.verifier.clone());
    let _ = Span::current().record("role", field::display(controller.role()));

    loop {
        let frame = tokio::select! {
            () = connection.closed() => {
                debug!("connection closed by server");
                break;
            }
            () = ctx.shutdown.cancelled() => {
                debug!("server shutting down, closing session");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let handled = match frame {
            Some(Ok(Message::Text(text))) => controller.handle_text(text.as_str()),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => controller.handle_text(text),
                Err(_) => {
                    warn!(len = data.len(), "non-UTF-8 binary frame, closing connection");
                    break;
                }
            },
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "read failed");
                break;
            }
            None => break,
        };

        let action = match handled {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "malformed frame, closing connection");
                break;
            }
        };

        match action {
            SessionAction::Reply(message) => {
                if matches!(message, ServerMessage::AdminStatus { .. })
                    && controller.role() == Role::Controller
                {
                    let _ = Span::current().record("role", field::display(Role::Controller));
                }
                reply(&ctx.dispatcher, &connection, &message);
            }
            SessionAction::Publish(message) => {
                if ctx.hub.publish(message).await.is_err() {
                    debug!("hub stopped, closing session");
                    break;
                }
            }
            SessionAction::Ignore => {}
        }
    }

    connection.close();
    ctx.hub.disconnect(&conn_id).await;
    if let Err(e) = writer.await {
        warn!(error = %e, "writer task failed");
    }

    info!(role = %controller.role(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Queue a message for this connection only.
fn reply(dispatcher: &Dispatcher, connection: &ClientConnection, message: &ServerMessage) {
    match message.to_frame() {
        Ok(frame) => {
            let _ = dispatcher.deliver_to_one(connection, frame);
        }
        Err(e) => warn!(kind = message.kind(), error = %e, "failed to serialize reply"),
    }
}

/// Drain `outbox` into `sink` until the connection closes.
///
/// This task is the only writer on the socket. A write that fails or takes
/// longer than `send_timeout` closes the connection. A Close frame is sent on
/// the way out.
pub(crate) async fn run_writer<S>(
    mut sink: S,
    mut outbox: mpsc::Receiver<Arc<str>>,
    connection: Arc<ClientConnection>,
    send_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let started = Instant::now();
    let mut written: u64 = 0;
    loop {
        let frame = tokio::select! {
            biased;
            () = connection.closed() => break,
            frame = outbox.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        match tokio::time::timeout(send_timeout, sink.send(Message::Text(frame.to_string().into())))
            .await
        {
            Ok(Ok(())) => written += 1,
            Ok(Err(e)) => {
                debug!(error = %e, "socket write failed");
                connection.close();
                break;
            }
            Err(_) => {
                warn!(
                    timeout_ms = send_timeout.as_millis(),
                    "socket write timed out, closing slow client"
                );
                counter!(WS_SLOW_CLIENT_EVICTIONS_TOTAL).increment(1);
                connection.close();
                break;
            }
        }
    }
    let _ = tokio::time::timeout(send_timeout, sink.send(Message::Close(None))).await;
    debug!(
        written,
        elapsed_ms = started.elapsed().as_millis(),
        "writer finished"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;

    use super::*;

    fn make_connection(capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ClientConnection::new("c1".into(), tx)), rx)
    }

    fn text(msg: &Message) -> Option<&str> {
        match msg {
            Message::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn writer_preserves_queue_order() {
        let (connection, outbox) = make_connection(16);
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        for i in 0..5 {
            connection.send(Arc::from(format!("m{i}"))).unwrap();
        }
        let writer = tokio::spawn(run_writer(
            sink,
            outbox,
            connection.clone(),
            Duration::from_secs(1),
        ));

        for i in 0..5 {
            let msg = wire.next().await.unwrap();
            assert_eq!(text(&msg), Some(format!("m{i}").as_str()));
        }
        connection.close();
        writer.await.unwrap();
        assert!(matches!(wire.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn writer_stops_when_sink_fails() {
        let (connection, outbox) = make_connection(16);
        let (sink, wire) = fmpsc::unbounded::<Message>();
        drop(wire);
        connection.send(Arc::from("x")).unwrap();

        run_writer(sink, outbox, connection.clone(), Duration::from_secs(1)).await;
        assert!(connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_socket_is_closed_after_send_timeout() {
        let (connection, outbox) = make_connection(16);
        // Buffer of one in-flight message per sender; nobody reads.
        let (sink, _wire) = fmpsc::channel::<Message>(0);
        connection.send(Arc::from("first")).unwrap();
        connection.send(Arc::from("second")).unwrap();

        let started = tokio::time::Instant::now();
        run_writer(sink, outbox, connection.clone(), Duration::from_secs(10)).await;

        assert!(connection.is_closed());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn writer_exits_on_close_without_frames() {
        let (connection, outbox) = make_connection(4);
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        connection.close();
        run_writer(sink, outbox, connection, Duration::from_secs(1)).await;
        assert!(matches!(wire.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn reply_goes_to_outbox() {
        let (connection, mut outbox) = make_connection(4);
        reply(
            &Dispatcher::new(4),
            &connection,
            &ServerMessage::AdminStatus { is_admin: true },
        );
        let frame = outbox.recv().await.unwrap();
        assert_eq!(&*frame, r#"{"type":"admin_status","isAdmin":true}"#);
    }
}
