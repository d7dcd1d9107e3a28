use std::net::SocketAddr;

use serde::Deserialize;
use wspoll_core::error::{Result, WsError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WsConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub connection: ConnectionSection,

    #[serde(default)]
    pub client: ClientSection,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSection::default(),
            connection: ConnectionSection::default(),
            client: ClientSection::default(),
        }
    }
}

impl WsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(WsError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.server.validate()?;
        self.connection.validate()?;
        self.client.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Sent in `Server:` headers.
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Accept sockets as soon as the listener is readable.
    #[serde(default = "default_true")]
    pub auto_accept_sockets: bool,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            identifier: default_identifier(),
            auto_accept_sockets: true,
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        header_value("server.identifier", &self.identifier)?;
        if self.poll_timeout_ms > 60_000 {
            return Err(WsError::Config(
                "server.poll_timeout_ms must be at most 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            WsError::Config(format!("server.listen must be a valid SocketAddr: {e}"))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    /// Read ceiling per readiness event.
    #[serde(default = "default_rate")]
    pub read_rate: usize,

    /// Write ceiling per readiness event.
    #[serde(default = "default_rate")]
    pub write_rate: usize,

    #[serde(default = "default_max_handshake_bytes")]
    pub max_handshake_bytes: usize,

    /// Wait for the peer's close echo this long before dropping the transport.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Server only: time between a parsed upgrade request and `accept()`.
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,

    /// `null` disables the limit.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: Option<u64>,

    /// `null` disables the limit.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: Option<u64>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            read_rate: default_rate(),
            write_rate: default_rate(),
            max_handshake_bytes: default_max_handshake_bytes(),
            close_timeout_ms: default_close_timeout_ms(),
            accept_timeout_ms: default_accept_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl ConnectionSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=16 * 1024 * 1024).contains(&self.read_rate) {
            return Err(WsError::Config(
                "connection.read_rate must be between 1 and 16777216".into(),
            ));
        }
        if !(1..=16 * 1024 * 1024).contains(&self.write_rate) {
            return Err(WsError::Config(
                "connection.write_rate must be between 1 and 16777216".into(),
            ));
        }
        if !(16..=1024 * 1024).contains(&self.max_handshake_bytes) {
            return Err(WsError::Config(
                "connection.max_handshake_bytes must be between 16 and 1048576".into(),
            ));
        }
        if !(1..=600_000).contains(&self.close_timeout_ms) {
            return Err(WsError::Config(
                "connection.close_timeout_ms must be between 1 and 600000".into(),
            ));
        }
        if !(1..=600_000).contains(&self.accept_timeout_ms) {
            return Err(WsError::Config(
                "connection.accept_timeout_ms must be between 1 and 600000".into(),
            ));
        }
        if self.max_frame_bytes == Some(0) || self.max_message_bytes == Some(0) {
            return Err(WsError::Config(
                "connection.max_frame_bytes and max_message_bytes must be positive or null".into(),
            ));
        }
        if let (Some(frame), Some(message)) = (self.max_frame_bytes, self.max_message_bytes) {
            if message < frame {
                return Err(WsError::Config(
                    "connection.max_message_bytes must not be smaller than max_frame_bytes".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// RFC 6455 requires masking; only disable against a test peer.
    #[serde(default = "default_true")]
    pub mask_payload: bool,

    #[serde(default = "default_identifier")]
    pub user_agent: String,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            mask_payload: true,
            user_agent: default_identifier(),
        }
    }
}

impl ClientSection {
    pub fn validate(&self) -> Result<()> {
        header_value("client.user_agent", &self.user_agent)
    }
}

fn header_value(field: &str, v: &str) -> Result<()> {
    if v.is_empty() || v.contains(['\r', '\n']) {
        return Err(WsError::Config(format!(
            "{field} must be a non-empty single-line header value"
        )));
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:9001".into()
}
fn default_identifier() -> String {
    format!("wspoll/{}", env!("CARGO_PKG_VERSION"))
}
fn default_true() -> bool {
    true
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_rate() -> usize {
    16 * 1024
}
fn default_max_handshake_bytes() -> usize {
    8192
}
fn default_close_timeout_ms() -> u64 {
    10_000
}
fn default_accept_timeout_ms() -> u64 {
    5000
}
fn default_max_frame_bytes() -> Option<u64> {
    Some(16 * 1024 * 1024)
}
fn default_max_message_bytes() -> Option<u64> {
    Some(64 * 1024 * 1024)
}
