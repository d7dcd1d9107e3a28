//! Per-connection protocol state machine.
//!
//! ```text
//! Connecting (client) ─┐
//!                      ├─> Open ─> ClosingLocal | ClosingRemote ─> Closed
//! AwaitingHandshake ───┘
//! ```
//!
//! A `Connection` owns its transport, buffers and close-handshake flags. It
//! never blocks: the multiplexer calls `handle_read`/`handle_write` when the
//! transport is ready, and each call moves at most `read_rate`/`write_rate`
//! bytes. Everything observable is appended to the caller's `Vec<Update>`.

mod read;
mod write;

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info_span, warn, Span};

use wspoll_core::protocol::handshake::{
    accept_token, client_request, generate_key, status_response, switching_protocols, HttpHead,
};
use wspoll_core::protocol::{encode, CloseCode, CloseReason, Opcode, Utf8Validator};
use wspoll_core::{Result, WsError};

use crate::config::WsConfig;
use crate::mux::Pollable;
use crate::transport::Transport;
use crate::update::{ConnectionId, ErrorCode, MessageSink, ReadCode, SinkStrategy, Update};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Client: upgrade request sent, no valid `101` yet.
    Connecting,
    /// Server: waiting for the request, or for `accept()`.
    AwaitingHandshake,
    Open,
    /// We sent a close and wait for the echo.
    ClosingLocal,
    /// The peer sent a close.
    ClosingRemote,
    Closed,
}

/// Per-connection limits and identity, flattened from [`WsConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub read_rate: usize,
    pub write_rate: usize,
    pub max_handshake_bytes: usize,
    pub close_timeout: Duration,
    pub accept_timeout: Duration,
    pub max_frame_bytes: Option<u64>,
    pub max_message_bytes: Option<u64>,
    /// Client role only.
    pub mask_payload: bool,
    /// `Server:` header value.
    pub identifier: String,
    pub user_agent: String,
}

impl ConnectionOptions {
    pub fn from_config(cfg: &WsConfig) -> Self {
        let c = &cfg.connection;
        Self {
            read_rate: c.read_rate.max(1),
            write_rate: c.write_rate.max(1),
            max_handshake_bytes: c.max_handshake_bytes,
            close_timeout: Duration::from_millis(c.close_timeout_ms),
            accept_timeout: Duration::from_millis(c.accept_timeout_ms),
            max_frame_bytes: c.max_frame_bytes,
            max_message_bytes: c.max_message_bytes,
            mask_payload: cfg.client.mask_payload,
            identifier: cfg.server.identifier.clone(),
            user_agent: cfg.client.user_agent.clone(),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_config(&WsConfig::default())
    }
}

#[derive(Debug, Default)]
struct Handshake {
    /// Server: request parsed. Client: valid `101` received.
    done: bool,
    /// Server: `accept()` called.
    accepted: bool,
    /// Server: `accept()` or `deny()` queued a response.
    responded: bool,
    head: Option<HttpHead>,
    /// Server: token to answer with. Client: token the server must send.
    accept_token: Option<String>,
    parsed_at: Option<Instant>,
    timeout_reported: bool,
}

enum Body {
    Memory(BytesMut),
    Sink(MessageSink),
}

struct PartialMessage {
    opcode: Opcode,
    body: Body,
    len: u64,
}

pub struct Connection {
    id: ConnectionId,
    role: Role,
    transport: Option<Box<dyn Transport>>,
    opts: ConnectionOptions,
    span: Span,
    /// Captured at construction; the transport is gone after close.
    peer_addr: Option<String>,

    read_buf: BytesMut,
    /// Bytes still missing from the frame at the front of `read_buf`.
    remaining_hint: usize,
    /// Frames buffered before `accept()` still need a pass.
    frames_pending: bool,

    priority: VecDeque<Bytes>,
    normal: VecDeque<Bytes>,
    in_flight: Option<Bytes>,

    handshake: Handshake,
    partial: Option<PartialMessage>,
    utf8: Utf8Validator,
    sink_strategy: Option<SinkStrategy>,

    we_initiated_close: bool,
    remote_sent_close: bool,
    we_sent_close: bool,
    close_deadline: Option<Instant>,
    close_after_write: bool,

    closed: bool,
    denied: bool,
    report_pending: bool,
    close_reported: bool,
}

impl Connection {
    fn new(
        id: ConnectionId,
        role: Role,
        mut transport: Box<dyn Transport>,
        opts: ConnectionOptions,
        parent: &Span,
    ) -> Result<Self> {
        transport.set_nonblocking(true)?;
        let peer_addr = transport.peer_addr();
        let span = info_span!(parent: parent, "ws_conn", id = id.get(), role = role.as_str());
        Ok(Self {
            id,
            role,
            transport: Some(transport),
            opts,
            span,
            peer_addr,
            read_buf: BytesMut::new(),
            remaining_hint: 0,
            frames_pending: false,
            priority: VecDeque::new(),
            normal: VecDeque::new(),
            in_flight: None,
            handshake: Handshake::default(),
            partial: None,
            utf8: Utf8Validator::new(),
            sink_strategy: None,
            we_initiated_close: false,
            remote_sent_close: false,
            we_sent_close: false,
            close_deadline: None,
            close_after_write: false,
            closed: false,
            denied: false,
            report_pending: false,
            close_reported: false,
        })
    }

    /// Server side of an accepted socket. Waits for the upgrade request.
    pub fn server(
        id: ConnectionId,
        transport: Box<dyn Transport>,
        opts: ConnectionOptions,
        parent: &Span,
    ) -> Result<Self> {
        let conn = Self::new(id, Role::Server, transport, opts, parent)?;
        conn.span.in_scope(|| debug!("connection opened"));
        Ok(conn)
    }

    /// Client side. The upgrade request is queued immediately.
    pub fn client(
        id: ConnectionId,
        transport: Box<dyn Transport>,
        host: &str,
        path: &str,
        opts: ConnectionOptions,
        parent: &Span,
    ) -> Result<Self> {
        let mut conn = Self::new(id, Role::Client, transport, opts, parent)?;
        let key = generate_key();
        let request = client_request(path, host, &conn.opts.user_agent, &key);
        conn.handshake.accept_token = Some(accept_token(&key));
        conn.priority.push_back(Bytes::from(request));
        conn.span.in_scope(|| debug!(%host, %path, "upgrade request queued"));
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if !self.is_handshaken() {
            match self.role {
                Role::Client => ConnectionState::Connecting,
                Role::Server => ConnectionState::AwaitingHandshake,
            }
        } else if self.remote_sent_close {
            ConnectionState::ClosingRemote
        } else if self.we_sent_close {
            ConnectionState::ClosingLocal
        } else {
            ConnectionState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A close was sent or received, or the transport is about to be dropped.
    pub fn is_disconnecting(&self) -> bool {
        self.we_sent_close || self.remote_sent_close || self.close_after_write
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closed and the terminal event has been handed out.
    pub fn is_finished(&self) -> bool {
        self.closed && self.close_reported
    }

    pub fn is_write_buffer_empty(&self) -> bool {
        self.in_flight.is_none() && self.priority.is_empty() && self.normal.is_empty()
    }

    /// Parsed request (server) or response (client) head.
    pub fn head(&self) -> Option<&HttpHead> {
        self.handshake.head.as_ref()
    }

    /// Request headers with lower-cased names.
    pub fn headers(&self) -> Option<&HashMap<String, String>> {
        self.handshake.head.as_ref().map(|h| &h.headers)
    }

    /// Request target.
    pub fn path(&self) -> Option<&str> {
        self.handshake.head.as_ref().and_then(|h| h.path.as_deref())
    }

    /// Decide per new message whether to buffer, stream, or refuse it.
    /// Remote address of a TCP transport. `None` for unnamed Unix sockets.
    pub fn peer_addr(&self) -> Option<&str> {
        self.peer_addr.as_deref()
    }

    pub fn set_sink_strategy(&mut self, strategy: SinkStrategy) {
        self.sink_strategy = Some(strategy);
    }

    fn is_handshaken(&self) -> bool {
        match self.role {
            Role::Client => self.handshake.done,
            Role::Server => self.handshake.accepted,
        }
    }

    fn mask(&self) -> bool {
        self.role == Role::Client && self.opts.mask_payload
    }

    fn writable(&self) -> Result<()> {
        if self.transport.is_none() {
            return Err(WsError::Closed);
        }
        if self.role == Role::Server && !self.handshake.accepted {
            return Err(WsError::InvalidState("connection not accepted"));
        }
        if self.we_sent_close {
            return Err(WsError::InvalidState("close frame already sent"));
        }
        Ok(())
    }

    /// Queue one frame. Ping and pong jump ahead of queued data.
    ///
    /// A close written here starts the close handshake like
    /// [`close_with`](Self::close_with).
    pub fn write(&mut self, data: &[u8], opcode: Opcode, fin: bool) -> Result<()> {
        if opcode == Opcode::Close {
            let reason = CloseReason::from_payload(data);
            return self.close_with(reason.code, &reason.reason);
        }
        self.writable()?;
        let frame = encode(data, self.mask(), opcode, fin)?;
        self.span.in_scope(|| {
            debug!(opcode = ?opcode, fin, len = data.len(), "frame queued");
        });
        if opcode.is_priority() {
            self.priority.push_back(frame);
        } else {
            self.normal.push_back(frame);
        }
        Ok(())
    }

    /// Split a text or binary message into frames of at most `frame_size` bytes.
    pub fn write_fragmented(&mut self, data: &[u8], opcode: Opcode, frame_size: usize) -> Result<()> {
        if !matches!(opcode, Opcode::Text | Opcode::Binary) {
            return Err(WsError::InvalidOpcode(opcode.as_u8()));
        }
        if data.is_empty() {
            return self.write(data, opcode, true);
        }
        let chunks: Vec<&[u8]> = data.chunks(frame_size.max(1)).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let op = if i == 0 { opcode } else { Opcode::Continuation };
            self.write(chunk, op, i == last)?;
        }
        Ok(())
    }

    /// Queue pre-serialized bytes as-is.
    pub fn write_raw(&mut self, bytes: Bytes, priority: bool) -> Result<()> {
        if self.transport.is_none() {
            return Err(WsError::Closed);
        }
        if priority {
            self.priority.push_back(bytes);
        } else {
            self.normal.push_back(bytes);
        }
        Ok(())
    }

    /// Start the close handshake. Later calls are no-ops.
    ///
    /// Before the handshake completes there is nobody to send a close frame
    /// to, so the transport is closed directly.
    pub fn close_with(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.transport.is_none() {
            return Err(WsError::Closed);
        }
        if self.we_sent_close {
            return Ok(());
        }
        if !self.is_handshaken() {
            self.close();
            return Ok(());
        }

        let payload = CloseReason::new(code, reason).to_payload();
        let frame = encode(&payload, self.mask(), Opcode::Close, true)?;
        if !self.remote_sent_close {
            self.we_initiated_close = true;
            self.close_deadline = Some(Instant::now() + self.opts.close_timeout);
        }
        self.we_sent_close = true;
        self.normal.push_back(frame);
        self.span.in_scope(|| debug!(code = code.as_u16(), %reason, "close queued"));
        Ok(())
    }

    /// Drop the transport without a close handshake.
    ///
    /// The terminal event goes out at the end of the current handler, or at
    /// the next pre-poll hook.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown() {
                self.span.in_scope(|| debug!(error = %e, "shutdown failed"));
            }
        }
        self.priority.clear();
        self.normal.clear();
        self.in_flight = None;
        self.partial = None;
        if !self.closed {
            self.closed = true;
            self.close_deadline = None;
            if !self.close_reported {
                self.report_pending = true;
            }
            self.span.in_scope(|| debug!("transport closed"));
        }
    }

    /// Server: answer the parsed upgrade request with `101`.
    pub fn accept(&mut self) -> Result<()> {
        if self.role != Role::Server {
            return Err(WsError::InvalidState("accept on a client connection"));
        }
        if self.transport.is_none() {
            return Err(WsError::Closed);
        }
        if !self.handshake.done {
            return Err(WsError::InvalidState("no upgrade request received"));
        }
        if self.handshake.responded {
            return Err(WsError::InvalidState("handshake already answered"));
        }
        let Some(token) = self.handshake.accept_token.as_deref() else {
            return Err(WsError::InvalidState("no upgrade request received"));
        };
        let response = switching_protocols(token, &self.opts.identifier);
        // nothing else can be queued before the 101
        self.priority.push_front(Bytes::from(response));
        self.handshake.responded = true;
        self.handshake.accepted = true;
        self.frames_pending = !self.read_buf.is_empty();
        self.span.in_scope(|| debug!("upgrade accepted"));
        Ok(())
    }

    /// Server: refuse the upgrade with an HTTP status and close once it is sent.
    pub fn deny(&mut self, status: u16) -> Result<()> {
        if self.role != Role::Server {
            return Err(WsError::InvalidState("deny on a client connection"));
        }
        if self.transport.is_none() {
            return Err(WsError::Closed);
        }
        if self.handshake.responded {
            return Err(WsError::InvalidState("handshake already answered"));
        }
        let response = status_response(status, &self.opts.identifier);
        self.priority.push_front(Bytes::from(response));
        self.handshake.responded = true;
        self.close_after_write = true;
        self.span.in_scope(|| debug!(status, "upgrade denied"));
        Ok(())
    }

    /// Deadline checks and pending close reports.
    pub fn before_poll(&mut self, out: &mut Vec<Update>) {
        let span = self.span.clone();
        let _enter = span.enter();

        self.check_timers(Instant::now(), out);

        if self.close_after_write && !self.closed && self.is_write_buffer_empty() {
            self.close();
        }

        if self.frames_pending && !self.closed {
            self.frames_pending = false;
            self.read_frames(out);
        }

        self.flush_close_report(out);
    }

    /// Earliest armed timer: the close-handshake deadline or the accept timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        match (self.close_deadline, self.accept_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire whatever timers expired while the selector was waiting.
    pub fn handle_timeout(&mut self, out: &mut Vec<Update>) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_timers(Instant::now(), out);
        self.flush_close_report(out);
    }

    fn accept_deadline(&self) -> Option<Instant> {
        if self.role != Role::Server || self.handshake.responded || self.handshake.timeout_reported {
            return None;
        }
        self.handshake.parsed_at.map(|t| t + self.opts.accept_timeout)
    }

    fn check_timers(&mut self, now: Instant, out: &mut Vec<Update>) {
        if self.closed {
            return;
        }

        if self.close_deadline.is_some_and(|d| now >= d) {
            warn!("close handshake timed out");
            out.push(Update::error(ErrorCode::DisconnectTimeout, Some(self.id)));
            self.close();
            return;
        }

        if self.accept_deadline().is_some_and(|d| now >= d) {
            warn!("upgrade not accepted in time");
            self.handshake.timeout_reported = true;
            out.push(Update::error(ErrorCode::AcceptTimeoutPassed, Some(self.id)));
            if let Err(e) = self.deny(504) {
                debug!(error = %e, "deny after accept timeout failed");
            }
        }
    }

    fn flush_close_report(&mut self, out: &mut Vec<Update>) {
        if !self.report_pending {
            return;
        }
        self.report_pending = false;
        self.close_reported = true;
        let code = if self.denied {
            ReadCode::ConnectionDenied
        } else {
            ReadCode::SockDisconnect
        };
        out.push(Update::read(code, Some(self.id)));
    }

    fn raw_handle(&self) -> Option<RawFd> {
        self.transport.as_ref().map(|t| t.raw_handle())
    }
}

impl Pollable for Connection {
    fn handle(&self) -> Option<RawFd> {
        self.raw_handle()
    }

    fn wants_write(&self) -> bool {
        self.transport.is_some() && !self.is_write_buffer_empty()
    }

    fn before_poll(&mut self, out: &mut Vec<Update>) {
        Connection::before_poll(self, out);
    }

    fn handle_read(&mut self, out: &mut Vec<Update>) {
        Connection::handle_read(self, out);
    }

    fn handle_write(&mut self, out: &mut Vec<Update>) {
        Connection::handle_write(self, out);
    }

    fn handle_exceptional(&mut self, out: &mut Vec<Update>) {
        Connection::handle_exceptional(self, out);
    }

    fn next_deadline(&self) -> Option<Instant> {
        Connection::next_deadline(self)
    }

    fn handle_timeout(&mut self, out: &mut Vec<Update>) {
        Connection::handle_timeout(self, out);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state())
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}
