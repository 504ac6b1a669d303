//! The event hub: the single task that owns the registry.
//!
//! Connect, disconnect and payload events are applied strictly in the order
//! they were submitted. Every registry change is followed by a
//! `user_count` broadcast, and every broadcast is queued for all members
//! before the next event is looked at, so all participants observe one
//! total order of page changes and counts.

use std::sync::Arc;

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use super::dispatcher::Dispatcher;
use super::registry::{CapacityExceeded, Registry, SizeGauge};
use crate::metrics::{HUB_EVENTS_TOTAL, WS_CONNECTIONS_ACTIVE};
use crate::protocol::ServerMessage;

/// Errors returned to hub submitters.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The registry was full when the connect event was applied.
    #[error(transparent)]
    CapacityExceeded(#[from] CapacityExceeded),
    /// The hub task has stopped.
    #[error("event hub is not running")]
    Closed,
}

/// Events consumed by the hub.
pub enum HubEvent {
    /// Register a connection and report the verdict on `admitted`.
    Connect {
        /// The new participant.
        connection: Arc<ClientConnection>,
        /// Receives the admission result.
        admitted: oneshot::Sender<Result<(), HubError>>,
    },
    /// Unregister a connection. Unknown IDs are ignored.
    Disconnect {
        /// Connection ID.
        id: String,
    },
    /// Broadcast a message to every registered connection.
    Payload(ServerMessage),
    /// Acknowledge once every earlier event has been applied.
    Flush(oneshot::Sender<()>),
}

impl HubEvent {
    fn label(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Payload(_) => "payload",
            Self::Flush(_) => "flush",
        }
    }
}

/// Submission side of the hub. Cheap to clone.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    size: SizeGauge,
    max_connections: usize,
}

impl HubHandle {
    /// Register `connection`, waiting for the hub's verdict.
    pub async fn connect(&self, connection: Arc<ClientConnection>) -> Result<(), HubError> {
        let (admitted, verdict) = oneshot::channel();
        self.submit(HubEvent::Connect {
            connection,
            admitted,
        })
        .await?;
        verdict.await.map_err(|_| HubError::Closed)?
    }

    /// Unregister a connection. Safe to call more than once.
    pub async fn disconnect(&self, id: &str) {
        if self
            .submit(HubEvent::Disconnect { id: id.to_string() })
            .await
            .is_err()
        {
            debug!(conn_id = id, "hub stopped before disconnect was submitted");
        }
    }

    /// Broadcast `message` to every registered connection.
    pub async fn publish(&self, message: ServerMessage) -> Result<(), HubError> {
        self.submit(HubEvent::Payload(message)).await
    }

    /// Wait until every event submitted before this call has been applied.
    pub async fn flush(&self) -> Result<(), HubError> {
        let (done, applied) = oneshot::channel();
        self.submit(HubEvent::Flush(done)).await?;
        applied.await.map_err(|_| HubError::Closed)
    }

    /// Submit a raw event.
    pub async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::Closed)
    }

    /// Current number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.size.get()
    }

    /// Configured maximum participants.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Admission gate: whether a new connection could currently be
    /// registered. The hub re-checks when the connect event is applied.
    pub fn has_capacity(&self) -> bool {
        self.participant_count() < self.max_connections
    }
}

/// The serialization point. Run it with [`EventHub::run`].
pub struct EventHub {
    rx: mpsc::Receiver<HubEvent>,
    registry: Registry,
    dispatcher: Dispatcher,
}

impl EventHub {
    /// Create a hub and its submission handle.
    pub fn new(
        max_connections: usize,
        queue_capacity: usize,
        dispatcher: Dispatcher,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let registry = Registry::new(max_connections);
        let handle = HubHandle {
            tx,
            size: registry.size_gauge(),
            max_connections,
        };
        (
            Self {
                rx,
                registry,
                dispatcher,
            },
            handle,
        )
    }

    /// Process events until every handle is dropped or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(max_connections = self.registry.capacity(), "event hub started");
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.apply(event);
        }
        for connection in self.registry.connections() {
            connection.close();
        }
        info!(remaining = self.registry.len(), "event hub stopped");
    }

    /// Apply one event.
    pub fn apply(&mut self, event: HubEvent) {
        counter!(HUB_EVENTS_TOTAL, "event" => event.label()).increment(1);
        match event {
            HubEvent::Connect {
                connection,
                admitted,
            } => self.connect(connection, admitted),
            HubEvent::Disconnect { id } => {
                if self.registry.remove(&id) {
                    debug!(conn_id = %id, count = self.registry.len(), "participant left");
                    self.participants_changed();
                } else {
                    debug!(conn_id = %id, "disconnect for unregistered connection ignored");
                }
            }
            HubEvent::Payload(message) => self.broadcast(&message),
            HubEvent::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    /// Registered participants.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn connect(
        &mut self,
        connection: Arc<ClientConnection>,
        admitted: oneshot::Sender<Result<(), HubError>>,
    ) {
        let id = connection.id.clone();
        if let Err(e) = self.registry.add(connection) {
            warn!(conn_id = %id, max = e.max, "registry full, connection refused");
            let _ = admitted.send(Err(e.into()));
            return;
        }
        if admitted.send(Ok(())).is_err() {
            // The session went away before learning it was admitted; nobody
            // would ever submit its disconnect.
            let _ = self.registry.remove(&id);
            debug!(conn_id = %id, "admitted connection already gone");
            return;
        }
        debug!(conn_id = %id, count = self.registry.len(), "participant joined");
        self.participants_changed();
    }

    fn participants_changed(&self) {
        let count = self.registry.len();
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
        self.broadcast(&ServerMessage::UserCount { count });
    }

    fn broadcast(&self, message: &ServerMessage) {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize message");
                return;
            }
        };
        let report = self
            .dispatcher
            .deliver_to_all(self.registry.connections(), &frame);
        debug!(
            kind = message.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            "broadcast"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
