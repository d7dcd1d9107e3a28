//! wspoll core: transport-agnostic WebSocket protocol primitives and error types.
//!
//! This crate defines the wire-level pieces shared by the engine and any
//! other driver: the frame codec, masking, close codes, the incremental
//! UTF-8 validator and the opening-handshake text. It carries no transport or
//! runtime dependencies.
//!
//! `unwrap`, `expect` and `panic!` are denied crate-wide. Malformed input
//! comes back as a `WsError` or `FrameError`, never a crash.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorKind, Result, WsError};
