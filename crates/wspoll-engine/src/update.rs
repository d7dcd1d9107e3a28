//! Events produced by one poll cycle.
//!
//! Every handler appends to a caller-supplied `Vec<Update>`; nothing is
//! yielded lazily and nothing outlives the cycle that produced it.

use std::fmt;
use std::io::Write;

use bytes::Bytes;
use wspoll_core::protocol::{CloseReason, FrameHeader, Opcode};

/// Stable per-table connection id. Readiness is keyed by these, never by fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadCode {
    /// Server: upgrade request parsed, waiting for `accept()`/`deny()`.
    NewConnection,
    /// A complete message.
    Read,
    Ping,
    Pong,
    /// Terminal event: transport closed.
    SockDisconnect,
    /// Terminal event for a client whose upgrade was refused.
    ConnectionDenied,
    /// Client: server answered `101` with the expected accept token.
    ConnectionAccepted,
    /// Peer started the close handshake; `message` holds the close payload.
    ReadDisconnect,
    /// Server: a socket was accepted from the listener.
    NewSocketConnected,
    /// Server (manual accept): the listener has a pending socket.
    NewSocketConnectionAvailable,
}

impl ReadCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadCode::NewConnection => "NEW_CONNECTION",
            ReadCode::Read => "READ",
            ReadCode::Ping => "PING",
            ReadCode::Pong => "PONG",
            ReadCode::SockDisconnect => "SOCK_DISCONNECT",
            ReadCode::ConnectionDenied => "CONNECTION_DENIED",
            ReadCode::ConnectionAccepted => "CONNECTION_ACCEPTED",
            ReadCode::ReadDisconnect => "READ_DISCONNECT",
            ReadCode::NewSocketConnected => "NEW_SOCKET_CONNECTED",
            ReadCode::NewSocketConnectionAvailable => "NEW_SOCKET_CONNECTION_AVAILABLE",
        }
    }

    /// Last event a connection ever reports.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadCode::SockDisconnect | ReadCode::ConnectionDenied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Select,
    Read,
    ReadHandshakeFailure,
    ReadHandshakeTooLarge,
    ReadInvalidPayload,
    ReadUnexpectedDisconnect,
    ReadProtocolError,
    RsvBitSet,
    Write,
    AcceptTimeoutPassed,
    WriteInvalidTargetStream,
    ReadDisconnectDuringHandshake,
    DisconnectTimeout,
    ReadNoStreamForNewMessage,
    AsyncConnectFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Select => "SELECT",
            ErrorCode::Read => "READ",
            ErrorCode::ReadHandshakeFailure => "READ_HANDSHAKE_FAILURE",
            ErrorCode::ReadHandshakeTooLarge => "READ_HANDSHAKE_TO_LARGE",
            ErrorCode::ReadInvalidPayload => "READ_INVALID_PAYLOAD",
            ErrorCode::ReadUnexpectedDisconnect => "READ_UNEXPECTED_DISCONNECT",
            ErrorCode::ReadProtocolError => "READ_PROTOCOL_ERROR",
            ErrorCode::RsvBitSet => "RSV_BIT_SET",
            ErrorCode::Write => "WRITE",
            ErrorCode::AcceptTimeoutPassed => "ACCEPT_TIMEOUT_PASSED",
            ErrorCode::WriteInvalidTargetStream => "WRITE_INVALID_TARGET_STREAM",
            ErrorCode::ReadDisconnectDuringHandshake => "READ_DISCONNECT_DURING_HANDSHAKE",
            ErrorCode::DisconnectTimeout => "DISCONNECT_TIMEOUT",
            ErrorCode::ReadNoStreamForNewMessage => "READ_NO_STREAM_FOR_NEW_MESSAGE",
            ErrorCode::AsyncConnectFailed => "ASYNC_CONNECT_FAILED",
        }
    }
}

/// Destination for a streamed message. Handed back in the final `Read` event.
pub type MessageSink = Box<dyn Write + Send>;

/// Where the payload of a new message goes.
pub enum SinkDecision {
    /// Accumulate in memory and deliver as `message`.
    Memory,
    /// Stream every fragment into the sink and deliver the sink itself.
    Sink(MessageSink),
    /// Refuse the message; the connection is closed with 1003.
    Deny,
}

/// Consulted once per new message with the header of its first frame.
pub type SinkStrategy = Box<dyn FnMut(&FrameHeader) -> SinkDecision + Send>;

pub struct ReadUpdate {
    pub code: ReadCode,
    pub connection: Option<ConnectionId>,
    pub opcode: Option<Opcode>,
    pub message: Option<Bytes>,
    pub sink: Option<MessageSink>,
}

impl ReadUpdate {
    /// Decoded close payload of a `READ_DISCONNECT` event.
    pub fn close_reason(&self) -> Option<CloseReason> {
        if self.code != ReadCode::ReadDisconnect {
            return None;
        }
        self.message.as_deref().map(CloseReason::from_payload)
    }
}

impl fmt::Debug for ReadUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadUpdate")
            .field("code", &self.code)
            .field("connection", &self.connection)
            .field("opcode", &self.opcode)
            .field("message_len", &self.message.as_ref().map(Bytes::len))
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorUpdate {
    pub code: ErrorCode,
    pub connection: Option<ConnectionId>,
}

#[derive(Debug)]
pub enum Update {
    Read(ReadUpdate),
    Error(ErrorUpdate),
}

impl Update {
    pub fn read(code: ReadCode, connection: Option<ConnectionId>) -> Self {
        Update::Read(ReadUpdate {
            code,
            connection,
            opcode: None,
            message: None,
            sink: None,
        })
    }

    pub fn message(
        code: ReadCode,
        connection: Option<ConnectionId>,
        opcode: Opcode,
        message: Bytes,
    ) -> Self {
        Update::Read(ReadUpdate {
            code,
            connection,
            opcode: Some(opcode),
            message: Some(message),
            sink: None,
        })
    }

    pub fn error(code: ErrorCode, connection: Option<ConnectionId>) -> Self {
        Update::Error(ErrorUpdate { code, connection })
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Update::Read(r) => r.connection,
            Update::Error(e) => e.connection,
        }
    }

    pub fn as_read(&self) -> Option<&ReadUpdate> {
        match self {
            Update::Read(r) => Some(r),
            Update::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorUpdate> {
        match self {
            Update::Error(e) => Some(e),
            Update::Read(_) => None,
        }
    }

    pub fn read_code(&self) -> Option<ReadCode> {
        self.as_read().map(|r| r.code)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.as_error().map(|e| e.code)
    }
}
