//! # pulse-client
//!
//! Client side of the Pulse protocol.
//!
//! - [`PulseClient`]: connect, send, reconnect, shutdown
//! - [`ClientState`]: lifecycle published through a `watch` channel
//! - [`BackoffPolicy`]: reconnect pacing ([`FixedBackoff`], [`ExponentialBackoff`])
//! - [`ClientHandler`]: callbacks for frames and session transitions

#![deny(unsafe_code)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod errors;
pub mod handler;
pub mod state;

pub use backoff::{BackoffPolicy, ExponentialBackoff, FixedBackoff};
pub use client::{PulseClient, Session};
pub use config::ClientConfig;
pub use errors::{ClientError, Result};
pub use handler::ClientHandler;
pub use state::ClientState;
