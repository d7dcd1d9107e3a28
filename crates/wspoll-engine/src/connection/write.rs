use std::io::{self, Write};

use tracing::{debug, warn};

use super::{Connection, ConnectionState};
use crate::update::{ErrorCode, Update};

impl Connection {
    /// Write at most `write_rate` bytes of the next queued buffer.
    ///
    /// The in-flight buffer always finishes first, then priority frames, then
    /// normal frames, so frames are never interleaved on the wire.
    pub fn handle_write(&mut self, out: &mut Vec<Update>) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.write_step(out);
        self.flush_close_report(out);
    }

    fn write_step(&mut self, out: &mut Vec<Update>) {
        let connecting = self.state() == ConnectionState::Connecting;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        if self.in_flight.is_none() {
            self.in_flight = self
                .priority
                .pop_front()
                .or_else(|| self.normal.pop_front());
        }

        if let Some(buf) = self.in_flight.take() {
            let n = buf.len().min(self.opts.write_rate);
            match transport.write(&buf[..n]) {
                Ok(written) => {
                    debug!(bytes = written, left = buf.len() - written, "write");
                    if written < buf.len() {
                        self.in_flight = Some(buf.slice(written..));
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                    self.in_flight = Some(buf);
                }
                Err(e) => {
                    warn!(error = %e, "write failed");
                    let code = if connecting {
                        ErrorCode::AsyncConnectFailed
                    } else {
                        ErrorCode::Write
                    };
                    out.push(Update::error(code, Some(self.id)));
                    self.close();
                    return;
                }
            }
        }

        if self.close_after_write && self.is_write_buffer_empty() {
            debug!("write buffer drained, closing");
            self.close();
        }
    }
}
