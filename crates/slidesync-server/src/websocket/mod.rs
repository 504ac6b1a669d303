//! Connection registry, event hub, delivery and per-connection sessions.

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod hub;
pub mod registry;
pub mod session;
