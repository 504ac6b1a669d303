//! The set of live connections.
//!
//! Owned and mutated only by the event hub task. Other tasks read the size
//! through a [`SizeGauge`], which the registry keeps in step with its map.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use super::connection::ClientConnection;

/// Registry is at its configured maximum.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("too many connections (limit {max})")]
pub struct CapacityExceeded {
    /// Configured maximum.
    pub max: usize,
}

/// Shared, lock-free view of the registry size.
#[derive(Clone, Debug, Default)]
pub struct SizeGauge(Arc<AtomicUsize>);

impl SizeGauge {
    /// Current registry size.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, size: usize) {
        self.0.store(size, Ordering::Release);
    }
}

/// Live connections indexed by connection ID.
pub struct Registry {
    connections: HashMap<String, Arc<ClientConnection>>,
    max: usize,
    size: SizeGauge,
}

impl Registry {
    /// Empty registry admitting at most `max` connections.
    pub fn new(max: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max,
            size: SizeGauge::default(),
        }
    }

    /// Insert a connection. Re-adding a registered ID replaces the entry
    /// without counting twice.
    pub fn add(&mut self, connection: Arc<ClientConnection>) -> Result<(), CapacityExceeded> {
        if !self.connections.contains_key(&connection.id) && self.connections.len() >= self.max {
            return Err(CapacityExceeded { max: self.max });
        }
        let _ = self.connections.insert(connection.id.clone(), connection);
        self.size.set(self.connections.len());
        Ok(())
    }

    /// Remove a connection; returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.connections.remove(id).is_some();
        self.size.set(self.connections.len());
        removed
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Configured maximum.
    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Current members.
    pub fn connections(&self) -> impl Iterator<Item = &Arc<ClientConnection>> {
        self.connections.values()
    }

    /// Handle for reading the size from other tasks.
    pub fn size_gauge(&self) -> SizeGauge {
        self.size.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
