//! # slidesync-server
//!
//! Real-time presentation sync over WebSocket.
//!
//! - Connection registry owned by a single event hub task; connects,
//!   disconnects and payloads are applied in one total order
//! - Per-connection outbound queues so a slow viewer never stalls a broadcast
//! - Controller/viewer roles gated by a replaceable [`auth::CredentialVerifier`]
//! - Document upload and retrieval, announced to every participant
//! - Health, Prometheus metrics and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod documents;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;
