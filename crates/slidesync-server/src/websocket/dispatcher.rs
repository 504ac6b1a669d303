//! Per-connection delivery with failure isolation.
//!
//! Delivery only queues a frame on the target connection; the socket write
//! happens on that connection's own writer task. A peer that stops reading
//! fills its own queue and nothing else, so one broadcast never waits on a
//! slow recipient. Peers that keep failing are closed, and their read loop
//! then submits the disconnect to the hub.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::connection::{ClientConnection, DeliveryError};
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_SLOW_CLIENT_EVICTIONS_TOTAL};

/// Outcome of a fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the frame was offered to.
    pub recipients: usize,
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections closed because of this delivery.
    pub evicted: usize,
}

/// Delivers frames to individual connections.
#[derive(Clone, Copy, Debug)]
pub struct Dispatcher {
    max_dropped_messages: u64,
}

impl Dispatcher {
    /// Close connections once they have dropped `max_dropped_messages` frames.
    pub fn new(max_dropped_messages: u64) -> Self {
        Self {
            max_dropped_messages: max_dropped_messages.max(1),
        }
    }

    /// Queue `frame` for one connection.
    ///
    /// A failure is logged and counted against that connection only. The
    /// connection is closed when its writer is gone or when it has dropped
    /// too many frames.
    pub fn deliver_to_one(
        &self,
        connection: &ClientConnection,
        frame: Arc<str>,
    ) -> Result<(), DeliveryError> {
        let Err(err) = connection.send(frame) else {
            return Ok(());
        };
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        let drops = connection.drop_count();
        let evict = err == DeliveryError::Closed || drops >= self.max_dropped_messages;
        if evict && !connection.is_closed() {
            warn!(conn_id = %connection.id, drops, error = %err, "closing unresponsive client");
            counter!(WS_SLOW_CLIENT_EVICTIONS_TOTAL).increment(1);
            connection.close();
        } else if !evict {
            warn!(conn_id = %connection.id, drops, error = %err, "failed to deliver frame");
        }
        Err(err)
    }

    /// Queue `frame` for every connection in `recipients`, independently.
    pub fn deliver_to_all<'a>(
        &self,
        recipients: impl IntoIterator<Item = &'a Arc<ClientConnection>>,
        frame: &Arc<str>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for connection in recipients {
            report.recipients += 1;
            let was_closed = connection.is_closed();
            match self.deliver_to_one(connection, Arc::clone(frame)) {
                Ok(()) => report.delivered += 1,
                Err(_) if !was_closed && connection.is_closed() => report.evicted += 1,
                Err(_) => {}
            }
        }
        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            evicted = report.evicted,
            "fan-out complete"
        );
        report
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
