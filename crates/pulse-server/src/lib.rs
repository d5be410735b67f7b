//! # pulse-server
//!
//! WebSocket application-protocol server.
//!
//! - [`connection`]: one upgraded socket with idempotent close, liveness and a property bag
//! - [`registry`]: live connection table with snapshot enumeration and broadcast
//! - [`backend`]: `mio` readiness poller or dedicated tokio tasks behind [`IoBackend`]
//! - [`heartbeat`]: periodic sweep evicting silent connections
//! - [`server`]: accept loop, graceful shutdown, `/health` and `/metrics`
//! - [`store`]: shared key/value, counter, lease and pub/sub collaborator

#![deny(unsafe_code)]

pub mod backend;
pub mod config;
pub mod connection;
pub mod errors;
pub mod handler;
pub mod health;
pub mod heartbeat;
pub mod lifecycle;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod store;

#[cfg(test)]
mod testing;

pub use backend::IoBackend;
pub use config::ServerConfig;
pub use connection::{CloseReason, Connection, ConnectionId, Transport};
pub use errors::{Result, ServerError};
pub use handler::MessageHandler;
pub use heartbeat::{HeartbeatMonitor, SweepReport};
pub use lifecycle::ServerCore;
pub use registry::Registry;
pub use server::PulseServer;
pub use store::{MemoryStore, SharedStore, StoreError};
