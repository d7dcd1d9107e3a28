//! Client facade: one outbound connection plus its own multiplexer.

use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use tracing::{info, Span};

use wspoll_core::protocol::{CloseCode, Opcode};
use wspoll_core::Result;

use crate::config::WsConfig;
use crate::connection::{Connection, ConnectionOptions, ConnectionState};
use crate::mux::{Multiplexer, Pollable};
use crate::transport::Transport;
use crate::update::{ConnectionId, SinkStrategy, Update};

pub struct Client {
    conn: Connection,
    mux: Multiplexer,
}

impl Client {
    /// Connect over TCP and queue the upgrade request for `path`.
    pub fn connect<A: ToSocketAddrs>(addr: A, path: &str, cfg: &WsConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let host = stream.peer_addr()?.to_string();
        info!(%host, %path, "client connected");
        Self::from_transport(Box::new(stream), &host, path, cfg)
    }

    /// Run the client over an already connected transport.
    pub fn from_transport(
        transport: Box<dyn Transport>,
        host: &str,
        path: &str,
        cfg: &WsConfig,
    ) -> Result<Self> {
        Self::with_options(
            ConnectionId::new(0),
            transport,
            host,
            path,
            ConnectionOptions::from_config(cfg),
        )
    }

    pub fn with_options(
        id: ConnectionId,
        transport: Box<dyn Transport>,
        host: &str,
        path: &str,
        opts: ConnectionOptions,
    ) -> Result<Self> {
        let parent = Span::current();
        let conn = Connection::client(id, transport, host, path, opts, &parent)?;
        Ok(Self {
            conn,
            mux: Multiplexer::new(),
        })
    }

    /// Poll this client alone.
    pub fn update(&mut self, timeout: Option<Duration>) -> Vec<Update> {
        self.mux.poll(std::slice::from_mut(&mut self.conn), timeout)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn write(&mut self, data: &[u8], opcode: Opcode) -> Result<()> {
        self.conn.write(data, opcode, true)
    }

    pub fn write_fragmented(&mut self, data: &[u8], opcode: Opcode, frame_size: usize) -> Result<()> {
        self.conn.write_fragmented(data, opcode, frame_size)
    }

    pub fn close_with(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        self.conn.close_with(code, reason)
    }

    pub fn close(&mut self) {
        self.conn.close();
    }

    pub fn set_sink_strategy(&mut self, strategy: SinkStrategy) {
        self.conn.set_sink_strategy(strategy);
    }

    /// Poll until every queued byte is on the wire.
    ///
    /// `false` if `timeout` passed first or the transport closed, in which
    /// case whatever was still queued is gone.
    pub fn write_until_empty(&mut self, timeout: Duration, out: &mut Vec<Update>) -> bool {
        let settled = self.poll_until(timeout, out, |conn| {
            conn.is_closed() || conn.is_write_buffer_empty()
        });
        settled && !self.conn.is_closed()
    }

    /// Poll until the connection is closed and its terminal event is in `out`.
    pub fn wait_until_disconnect(&mut self, timeout: Duration, out: &mut Vec<Update>) -> bool {
        self.poll_until(timeout, out, Connection::is_finished)
    }

    fn poll_until(
        &mut self,
        timeout: Duration,
        out: &mut Vec<Update>,
        done: impl Fn(&Connection) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.conn) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            out.extend(self.update(Some(deadline - now)));
        }
    }
}

impl Pollable for Client {
    fn handle(&self) -> Option<RawFd> {
        self.conn.handle()
    }

    fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    fn before_poll(&mut self, out: &mut Vec<Update>) {
        self.conn.before_poll(out);
    }

    fn handle_read(&mut self, out: &mut Vec<Update>) {
        self.conn.handle_read(out);
    }

    fn handle_write(&mut self, out: &mut Vec<Update>) {
        self.conn.handle_write(out);
    }

    fn handle_exceptional(&mut self, out: &mut Vec<Update>) {
        self.conn.handle_exceptional(out);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.conn.next_deadline()
    }

    fn handle_timeout(&mut self, out: &mut Vec<Update>) {
        self.conn.handle_timeout(out);
    }
}
