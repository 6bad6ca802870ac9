//! Transport layer for the RPC framework.
//!
//! This module contains:
//! - Client connection handling (reply dispatch, heartbeats)
//! - Client API with per-call timeouts and streamed replies
//! - Server implementation with per-call isolation

pub mod client;
pub mod connection;
pub mod server;
