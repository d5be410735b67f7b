//! # pulse-core
//!
//! Shared building blocks for the Pulse workspace:
//!
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests
//! - **Backoff**: fixed and exponential delay math used by reconnect policies
//! - **Constants**: liveness and framing defaults shared by server and client

#![deny(unsafe_code)]

pub mod backoff;
pub mod constants;
pub mod logging;
