use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, error, warn};

use wspoll_core::protocol::handshake::{
    accept_token, error_page, find_head_end, validate_upgrade_request, HttpHead, HEAD_TERMINATOR,
};
use wspoll_core::protocol::{
    extract_payload, parse_header, CloseCode, CloseReason, FrameError, FrameHeader, Opcode,
};

use super::{Body, Connection, ConnectionState, PartialMessage, Role};
use crate::update::{ErrorCode, ReadCode, ReadUpdate, SinkDecision, Update};

impl Body {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Body::Memory(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            Body::Sink(sink) => sink.write_all(data),
        }
    }
}

impl Connection {
    /// Read up to `read_rate` bytes and process whatever is complete.
    pub fn handle_read(&mut self, out: &mut Vec<Update>) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.read_step(out);
        self.flush_close_report(out);
    }

    /// Exceptional readiness only matters while a client is still connecting.
    pub fn handle_exceptional(&mut self, out: &mut Vec<Update>) {
        let span = self.span.clone();
        let _enter = span.enter();
        if self.state() == ConnectionState::Connecting {
            warn!("connect failed");
            out.push(Update::error(ErrorCode::AsyncConnectFailed, Some(self.id)));
            self.close();
        } else {
            warn!("exceptional condition on transport");
        }
        self.flush_close_report(out);
    }

    fn read_step(&mut self, out: &mut Vec<Update>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        let want = match self.remaining_hint {
            0 => self.opts.read_rate,
            n => n.min(self.opts.read_rate),
        };
        let start = self.read_buf.len();
        self.read_buf.resize(start + want, 0);
        let res = transport.read(&mut self.read_buf[start..]);

        match res {
            Ok(0) => {
                self.read_buf.truncate(start);
                self.on_eof(out);
            }
            Ok(n) => {
                self.read_buf.truncate(start + n);
                debug!(bytes = n, buffered = self.read_buf.len(), "read");
                self.process_input(out);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                self.read_buf.truncate(start);
            }
            Err(e) => {
                self.read_buf.truncate(start);
                warn!(error = %e, "read failed");
                out.push(Update::error(ErrorCode::Read, Some(self.id)));
                self.close();
            }
        }
    }

    fn on_eof(&mut self, out: &mut Vec<Update>) {
        if !self.is_handshaken() {
            warn!("peer disconnected during handshake");
            out.push(Update::error(
                ErrorCode::ReadDisconnectDuringHandshake,
                Some(self.id),
            ));
        } else if self.remote_sent_close && self.we_sent_close {
            debug!("peer closed after close exchange");
        } else {
            warn!("peer disconnected without close handshake");
            out.push(Update::error(ErrorCode::ReadUnexpectedDisconnect, Some(self.id)));
        }
        self.close();
    }

    fn process_input(&mut self, out: &mut Vec<Update>) {
        if self.close_after_write {
            // everything past the failure point is discarded
            self.read_buf.clear();
            return;
        }

        if !self.handshake.done {
            let Some(head) = self.take_head(out) else {
                return;
            };
            match self.role {
                Role::Server => self.on_request(head, out),
                Role::Client => self.on_response(head, out),
            }
        }

        if self.awaiting_accept() && self.read_buf.len() > self.opts.max_handshake_bytes {
            warn!(buffered = self.read_buf.len(), "too much data before accept");
            self.read_buf.clear();
            out.push(Update::error(ErrorCode::ReadProtocolError, Some(self.id)));
            self.close();
            return;
        }

        if self.is_handshaken() && !self.closed && !self.close_after_write {
            self.read_frames(out);
        }
    }

    /// Server: request parsed, `accept()`/`deny()` not called yet.
    fn awaiting_accept(&self) -> bool {
        self.role == Role::Server && self.handshake.done && !self.handshake.responded
    }

    /// Pop the HTTP head off the read buffer once its terminator arrived.
    fn take_head(&mut self, out: &mut Vec<Update>) -> Option<HttpHead> {
        let max = self.opts.max_handshake_bytes;
        match find_head_end(&self.read_buf) {
            Some(end) if end + HEAD_TERMINATOR.len() <= max => {
                let head = HttpHead::parse(&self.read_buf[..end]);
                self.read_buf.advance(end + HEAD_TERMINATOR.len());
                Some(head)
            }
            Some(_) => {
                self.head_too_large(out);
                None
            }
            None if self.read_buf.len() >= max => {
                self.head_too_large(out);
                None
            }
            None => None,
        }
    }

    fn head_too_large(&mut self, out: &mut Vec<Update>) {
        warn!(buffered = self.read_buf.len(), "handshake too large");
        self.read_buf.clear();
        out.push(Update::error(ErrorCode::ReadHandshakeTooLarge, Some(self.id)));
        match self.role {
            Role::Server => {
                self.priority
                    .push_back(Bytes::from(error_page(431, &self.opts.identifier)));
                self.close_after_write = true;
            }
            Role::Client => self.close(),
        }
    }

    fn on_request(&mut self, head: HttpHead, out: &mut Vec<Update>) {
        match validate_upgrade_request(&head) {
            Ok(key) => {
                debug!(path = head.path.as_deref().unwrap_or(""), "upgrade request");
                self.handshake.accept_token = Some(accept_token(&key));
                self.handshake.head = Some(head);
                self.handshake.done = true;
                self.handshake.parsed_at = Some(Instant::now());
                out.push(Update::read(ReadCode::NewConnection, Some(self.id)));
            }
            Err(status) => {
                warn!(status, "invalid upgrade request");
                self.priority
                    .push_back(Bytes::from(error_page(status, &self.opts.identifier)));
                self.handshake.responded = true;
                self.close_after_write = true;
                out.push(Update::error(ErrorCode::ReadHandshakeFailure, Some(self.id)));
            }
        }
    }

    fn on_response(&mut self, head: HttpHead, out: &mut Vec<Update>) {
        let accepted = head.status == Some(101)
            && head.header("sec-websocket-accept") == self.handshake.accept_token.as_deref();
        if accepted {
            debug!("upgrade accepted by server");
            self.handshake.head = Some(head);
            self.handshake.done = true;
            out.push(Update::read(ReadCode::ConnectionAccepted, Some(self.id)));
        } else {
            warn!(status = ?head.status, "upgrade refused");
            self.handshake.head = Some(head);
            self.denied = true;
            self.close();
        }
    }

    /// Process every complete frame in the read buffer.
    pub(super) fn read_frames(&mut self, out: &mut Vec<Update>) {
        let mut pongs: Vec<Bytes> = Vec::new();
        while self.read_frame(out, &mut pongs).is_continue() {}

        if !self.closed && !self.is_disconnecting() {
            for payload in pongs {
                if let Err(e) = self.write(&payload, Opcode::Pong, true) {
                    debug!(error = %e, "pong not queued");
                }
            }
        }
    }

    fn read_frame(&mut self, out: &mut Vec<Update>, pongs: &mut Vec<Bytes>) -> ControlFlow<()> {
        let Some(header) = parse_header(&self.read_buf) else {
            self.remaining_hint = 0;
            return ControlFlow::Break(());
        };
        if self.closed {
            warn!("frame received after close, dropped");
            self.read_buf.clear();
            return ControlFlow::Break(());
        }

        if header.rsv != 0 {
            self.fail(CloseCode::ProtocolError, "RSV bits must be 0", ErrorCode::RsvBitSet, out);
            return ControlFlow::Break(());
        }
        if self.opts.max_frame_bytes.is_some_and(|max| header.length > max) {
            self.fail(CloseCode::TooLarge, "Frame too large", ErrorCode::ReadProtocolError, out);
            return ControlFlow::Break(());
        }

        let payload = match extract_payload(&self.read_buf, &header) {
            Ok(p) => p,
            Err(FrameError::Incomplete) => {
                let missing = header.frame_len().saturating_sub(self.read_buf.len() as u64);
                self.remaining_hint = usize::try_from(missing).unwrap_or(usize::MAX);
                return ControlFlow::Break(());
            }
            Err(FrameError::Protocol(violation)) => {
                let reason = violation.to_string();
                self.fail(CloseCode::ProtocolError, &reason, ErrorCode::ReadProtocolError, out);
                return ControlFlow::Break(());
            }
        };
        self.remaining_hint = 0;
        self.read_buf.advance(header.payload_offset + payload.len());

        let Some(opcode) = header.opcode() else {
            error!(opcode = header.opcode, "unknown opcode passed frame validation");
            self.fail(CloseCode::ProtocolError, "Unknown opcode", ErrorCode::ReadProtocolError, out);
            return ControlFlow::Break(());
        };
        debug!(opcode = ?opcode, fin = header.fin, len = payload.len(), "frame");

        match opcode {
            Opcode::Continuation | Opcode::Text | Opcode::Binary => {
                self.on_data_frame(&header, opcode, payload, out)
            }
            Opcode::Close => self.on_close_frame(&payload, out),
            Opcode::Ping => {
                out.push(Update::message(ReadCode::Ping, Some(self.id), opcode, payload.clone()));
                pongs.push(payload);
                ControlFlow::Continue(())
            }
            Opcode::Pong => {
                out.push(Update::message(ReadCode::Pong, Some(self.id), opcode, payload));
                ControlFlow::Continue(())
            }
        }
    }

    fn on_data_frame(
        &mut self,
        header: &FrameHeader,
        opcode: Opcode,
        payload: Bytes,
        out: &mut Vec<Update>,
    ) -> ControlFlow<()> {
        if self.remote_sent_close {
            warn!("data frame after peer close, dropped");
            self.partial = None;
            self.utf8.reset();
            return ControlFlow::Continue(());
        }

        let message_opcode = match (opcode, self.partial.as_ref()) {
            (Opcode::Continuation, None) => {
                self.fail(
                    CloseCode::ProtocolError,
                    "Continuation frame without a message in progress",
                    ErrorCode::ReadProtocolError,
                    out,
                );
                return ControlFlow::Break(());
            }
            (Opcode::Continuation, Some(p)) => p.opcode,
            (_, Some(_)) => {
                self.fail(
                    CloseCode::ProtocolError,
                    "New message started before the previous one finished",
                    ErrorCode::ReadInvalidPayload,
                    out,
                );
                return ControlFlow::Break(());
            }
            (op, None) => op,
        };
        let new_message = opcode != Opcode::Continuation;
        if new_message {
            self.utf8.reset();
        }

        if message_opcode == Opcode::Text {
            let valid = self.utf8.feed(&payload) && (!header.fin || self.utf8.is_complete());
            if !valid {
                self.fail(
                    CloseCode::InvalidPayload,
                    "Invalid UTF-8 in text message",
                    ErrorCode::ReadInvalidPayload,
                    out,
                );
                return ControlFlow::Break(());
            }
        }

        if new_message {
            let decision = match self.sink_strategy.as_mut() {
                Some(strategy) => strategy(header),
                None => SinkDecision::Memory,
            };
            let body = match decision {
                SinkDecision::Memory => Body::Memory(BytesMut::new()),
                SinkDecision::Sink(sink) => Body::Sink(sink),
                SinkDecision::Deny => {
                    self.fail(
                        CloseCode::UnsupportedPayload,
                        "No stream available for new message",
                        ErrorCode::ReadNoStreamForNewMessage,
                        out,
                    );
                    return ControlFlow::Break(());
                }
            };
            self.partial = Some(PartialMessage {
                opcode: message_opcode,
                body,
                len: 0,
            });
        }

        let total = self.partial.as_ref().map_or(0, |p| p.len) + payload.len() as u64;
        if self.opts.max_message_bytes.is_some_and(|max| total > max) {
            self.fail(CloseCode::TooLarge, "Message too large", ErrorCode::ReadProtocolError, out);
            return ControlFlow::Break(());
        }
        let appended = match self.partial.as_mut() {
            Some(p) => {
                p.len = total;
                p.body.append(&payload)
            }
            None => return ControlFlow::Break(()),
        };
        if let Err(e) = appended {
            warn!(error = %e, "message sink write failed");
            out.push(Update::error(ErrorCode::WriteInvalidTargetStream, Some(self.id)));
            self.close();
            return ControlFlow::Break(());
        }

        if header.fin {
            // state is reset before the event goes out
            if let Some(done) = self.partial.take() {
                self.utf8.reset();
                out.push(self.message_update(done));
            }
        }
        ControlFlow::Continue(())
    }

    fn message_update(&self, done: PartialMessage) -> Update {
        let (message, sink) = match done.body {
            Body::Memory(buf) => (Some(buf.freeze()), None),
            Body::Sink(sink) => (None, Some(sink)),
        };
        Update::Read(ReadUpdate {
            code: ReadCode::Read,
            connection: Some(self.id),
            opcode: Some(done.opcode),
            message,
            sink,
        })
    }

    fn on_close_frame(&mut self, payload: &[u8], out: &mut Vec<Update>) -> ControlFlow<()> {
        let reason = CloseReason::from_payload(payload);
        self.remote_sent_close = true;

        if self.we_initiated_close {
            debug!(code = reason.code.as_u16(), "close handshake complete");
            if self.is_write_buffer_empty() {
                self.close();
            } else {
                // our own close frame is still queued
                self.close_after_write = true;
            }
            self.read_buf.clear();
            return ControlFlow::Break(());
        }

        if !self.we_sent_close {
            debug!(code = reason.code.as_u16(), reason = %reason.reason, "peer closing");
            out.push(Update::message(
                ReadCode::ReadDisconnect,
                Some(self.id),
                Opcode::Close,
                reason.to_payload(),
            ));
            if let Err(e) = self.close_with(reason.code, &reason.reason) {
                debug!(error = %e, "close echo not queued");
            }
            self.close_after_write = true;
        }
        self.read_buf.clear();
        ControlFlow::Break(())
    }

    /// Protocol violation: send a close, drain, then drop the transport.
    fn fail(&mut self, code: CloseCode, reason: &str, error: ErrorCode, out: &mut Vec<Update>) {
        warn!(error = error.as_str(), close_code = code.as_u16(), "{reason}");
        self.partial = None;
        self.utf8.reset();
        self.read_buf.clear();
        if let Err(e) = self.close_with(code, reason) {
            debug!(error = %e, "close not queued");
        }
        self.close_after_write = true;
        out.push(Update::error(error, Some(self.id)));
    }
}
