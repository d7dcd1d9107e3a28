//! wspoll engine: WebSocket connections driven by a readiness poll loop.
//!
//! - [`connection`]: the per-connection RFC 6455 state machine.
//! - [`mux`]: the `poll(2)` multiplexer and the registry/pollable seams.
//! - [`server`] / [`client`]: facades owning a connection table or a single connection.
//! - [`update`]: events returned by every poll cycle.
//! - [`config`]: strict YAML configuration.
//!
//! Everything runs on the caller's thread. No call blocks except the
//! selector wait inside `poll`.

pub mod client;
pub mod config;
pub mod connection;
pub mod mux;
pub mod server;
pub mod transport;
pub mod update;

pub use client::Client;
pub use connection::{Connection, ConnectionOptions, ConnectionState, Role};
pub use mux::{Multiplexer, PollSelector};
pub use server::Server;
pub use update::{ConnectionId, ErrorCode, ReadCode, SinkDecision, Update};
