//! Shared error type across wspoll crates.

use thiserror::Error;

/// Stable error categories (used by test vectors and log fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Frame could not be built or parsed.
    InvalidFrame,
    /// Opening handshake was malformed or refused.
    Handshake,
    /// Operation not allowed in the current connection state.
    InvalidState,
    /// Connection transport is already closed.
    Closed,
    /// Configuration rejected.
    Config,
    /// Underlying transport failure.
    Io,
}

impl ErrorKind {
    /// String representation used in vectors and structured logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidFrame => "INVALID_FRAME",
            ErrorKind::Handshake => "HANDSHAKE",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Closed => "CLOSED",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Io => "IO",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, WsError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("invalid opcode {0}, expected 0..=15")]
    InvalidOpcode(u8),
    #[error("invalid rsv bits {0:#05b}")]
    InvalidRsv(u8),
    #[error("control frames must be final")]
    FragmentedControl,
    #[error("invalid control frame payload length: {0} bytes")]
    ControlLength(usize),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("connection closed")]
    Closed,
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Map to a stable category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WsError::InvalidOpcode(_)
            | WsError::InvalidRsv(_)
            | WsError::FragmentedControl
            | WsError::ControlLength(_) => ErrorKind::InvalidFrame,
            WsError::Handshake(_) => ErrorKind::Handshake,
            WsError::InvalidState(_) => ErrorKind::InvalidState,
            WsError::Closed => ErrorKind::Closed,
            WsError::Config(_) => ErrorKind::Config,
            WsError::Io(_) => ErrorKind::Io,
        }
    }
}
