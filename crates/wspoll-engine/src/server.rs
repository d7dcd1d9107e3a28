//! Server facade: listener, connection table and the poll loop around them.

use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Span};

use wspoll_core::protocol::{CloseCode, Opcode};
use wspoll_core::{Result, WsError};

use crate::client::Client;
use crate::config::WsConfig;
use crate::connection::{Connection, ConnectionOptions};
use crate::mux::{dispatch_one, expire_one, prepare_one, Interest, Multiplexer, Ready, Registry};
use crate::transport::Transport;
use crate::update::{ConnectionId, ReadCode, Update};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Listener,
    Conn(ConnectionId),
}

/// Listener plus connections; the part of a server the multiplexer polls.
pub struct ServerTable {
    listener: Option<TcpListener>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
    auto_accept: bool,
    opts: ConnectionOptions,
    span: Span,
}

impl ServerTable {
    fn insert(&mut self, transport: Box<dyn Transport>) -> Result<ConnectionId> {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        let conn = Connection::server(id, transport, self.opts.clone(), &self.span)?;
        self.connections.insert(id, conn);
        Ok(id)
    }

    fn accept_one(&mut self) -> Result<Option<ConnectionId>> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(WsError::InvalidState("server has no listener"));
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nodelay(true)?;
                let id = self.insert(Box::new(stream))?;
                debug!(%peer, id = id.get(), "socket accepted");
                Ok(Some(id))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn on_listener_ready(&mut self, out: &mut Vec<Update>) {
        if !self.auto_accept {
            out.push(Update::read(ReadCode::NewSocketConnectionAvailable, None));
            return;
        }
        loop {
            match self.accept_one() {
                Ok(Some(id)) => out.push(Update::read(ReadCode::NewSocketConnected, Some(id))),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn prune(&mut self, id: ConnectionId) {
        if self.connections.get(&id).is_some_and(Connection::is_finished) {
            self.connections.remove(&id);
            debug!(id = id.get(), "connection removed");
        }
    }
}

impl Registry for ServerTable {
    type Key = Slot;

    fn prepare(&mut self, out: &mut Vec<Update>) -> Vec<(Slot, Interest)> {
        let mut entries = Vec::with_capacity(self.connections.len() + 1);
        if let Some(listener) = self.listener.as_ref() {
            entries.push((
                Slot::Listener,
                Interest {
                    fd: listener.as_raw_fd(),
                    write: false,
                },
            ));
        }
        for (id, conn) in self.connections.iter_mut() {
            if let Some(interest) = prepare_one(conn, out) {
                entries.push((Slot::Conn(*id), interest));
            }
        }
        self.connections.retain(|_, c| !c.is_finished());
        entries
    }

    fn dispatch(&mut self, key: &Slot, ready: Ready, out: &mut Vec<Update>) {
        match (key, ready) {
            (Slot::Listener, Ready::Read) => self.on_listener_ready(out),
            (Slot::Listener, _) => {}
            (Slot::Conn(id), ready) => {
                let Some(conn) = self.connections.get_mut(id) else {
                    return;
                };
                dispatch_one(conn, ready, out);
                self.prune(*id);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .filter_map(Connection::next_deadline)
            .min()
    }

    fn expire(&mut self, now: Instant, out: &mut Vec<Update>) {
        for conn in self.connections.values_mut() {
            expire_one(conn, now, out);
        }
        self.connections.retain(|_, c| !c.is_finished());
    }
}

pub struct Server {
    table: ServerTable,
    mux: Multiplexer,
    poll_timeout: Duration,
}

impl Server {
    /// Bind a non-blocking listener on `server.listen`.
    pub fn bind(cfg: &WsConfig) -> Result<Self> {
        let addr = cfg.server.listen_addr()?;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        let server = Self::build(cfg, Some(listener), info_span!("wspoll_server", listen = %local));
        server.table.span.in_scope(|| info!(%local, "listening"));
        Ok(server)
    }

    /// A server with no listener; connections come from [`add_transport`](Self::add_transport).
    pub fn without_listener(cfg: &WsConfig) -> Self {
        Self::build(cfg, None, info_span!("wspoll_server", listen = "none"))
    }

    fn build(cfg: &WsConfig, listener: Option<TcpListener>, span: Span) -> Self {
        Self {
            table: ServerTable {
                listener,
                connections: BTreeMap::new(),
                next_id: 1,
                auto_accept: cfg.server.auto_accept_sockets,
                opts: ConnectionOptions::from_config(cfg),
                span,
            },
            mux: Multiplexer::new(),
            poll_timeout: Duration::from_millis(cfg.server.poll_timeout_ms),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.table.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Configured `server.poll_timeout_ms`.
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Override the options used for connections created from now on.
    pub fn set_connection_options(&mut self, opts: ConnectionOptions) {
        self.table.opts = opts;
    }

    /// Run one poll cycle.
    pub fn update(&mut self, timeout: Option<Duration>) -> Vec<Update> {
        self.mux.poll(&mut self.table, timeout)
    }

    /// Accept one pending socket (manual-accept mode). `None` if nothing is pending.
    pub fn accept_new_connection(&mut self) -> Result<Option<ConnectionId>> {
        self.table.accept_one()
    }

    /// Serve an already connected transport.
    pub fn add_transport(&mut self, transport: Box<dyn Transport>) -> Result<ConnectionId> {
        self.table.insert(transport)
    }

    /// Connected server connection plus a client over a Unix socket pair.
    pub fn create_server_client_pair(&mut self, path: &str) -> Result<(ConnectionId, Client)> {
        let (server_side, client_side) = UnixStream::pair()?;
        let id = self.add_transport(Box::new(server_side))?;
        let client = Client::with_options(
            id,
            Box::new(client_side),
            "localhost",
            path,
            self.table.opts.clone(),
        )?;
        Ok((id, client))
    }

    pub fn len(&self) -> usize {
        self.table.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.connections.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.table.connections.keys().copied()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.table.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.table.connections.get_mut(&id)
    }

    fn require(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        self.table
            .connections
            .get_mut(&id)
            .ok_or(WsError::InvalidState("unknown connection"))
    }

    pub fn accept(&mut self, id: ConnectionId) -> Result<()> {
        self.require(id)?.accept()
    }

    pub fn deny(&mut self, id: ConnectionId, status: u16) -> Result<()> {
        self.require(id)?.deny(status)
    }

    pub fn write(&mut self, id: ConnectionId, data: &[u8], opcode: Opcode) -> Result<()> {
        self.require(id)?.write(data, opcode, true)
    }

    pub fn close_with(&mut self, id: ConnectionId, code: CloseCode, reason: &str) -> Result<()> {
        self.require(id)?.close_with(code, reason)
    }

    /// Start the close handshake on every open connection.
    pub fn disconnect_all(&mut self, code: CloseCode, reason: &str) {
        for conn in self.table.connections.values_mut() {
            if let Err(e) = conn.close_with(code, reason) {
                debug!(id = conn.id().get(), error = %e, "close skipped");
            }
        }
    }

    /// Drop one connection's transport without a close handshake.
    ///
    /// The entry leaves the table after its `SOCK_DISCONNECT` is reported.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        match self.table.connections.get_mut(&id) {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Drop the listener and every transport.
    pub fn close(&mut self) {
        if self.table.listener.take().is_some() {
            self.table.span.in_scope(|| info!("listener closed"));
        }
        for conn in self.table.connections.values_mut() {
            conn.close();
        }
    }
}
