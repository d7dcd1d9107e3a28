//! wspoll-echo
//!
//! Accepts every upgrade and echoes text/binary messages back with the same
//! opcode. Config path is the first argument; defaults apply without one.

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use wspoll_core::Result;
use wspoll_engine::config::{self, WsConfig};
use wspoll_engine::{ErrorCode, ReadCode, Server, Update};

fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run() {
        tracing::error!(kind = e.kind().as_str(), error = %e, "wspoll-echo failed");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cfg = match std::env::args().nth(1) {
        Some(path) => config::load_from_file(&path)?,
        None => WsConfig::default(),
    };

    let mut server = Server::bind(&cfg)?;
    let timeout = Some(server.poll_timeout());
    info!(listen = ?server.local_addr(), "wspoll-echo starting");

    loop {
        for update in server.update(timeout) {
            match update {
                Update::Read(r) => match (r.code, r.connection) {
                    (ReadCode::NewConnection, Some(id)) => {
                        if let Err(e) = server.accept(id) {
                            warn!(id = id.get(), error = %e, "accept failed");
                        }
                    }
                    (ReadCode::Read, Some(id)) => {
                        let (Some(opcode), Some(message)) = (r.opcode, r.message.as_ref()) else {
                            continue;
                        };
                        if let Err(e) = server.write(id, message, opcode) {
                            warn!(id = id.get(), error = %e, "echo failed");
                        }
                    }
                    (code, id) => info!(code = code.as_str(), id = ?id, "update"),
                },
                Update::Error(e) if e.code == ErrorCode::Select => {
                    warn!("select failed");
                }
                Update::Error(e) => {
                    warn!(code = e.code.as_str(), id = ?e.connection, "connection error");
                }
            }
        }
    }
}
