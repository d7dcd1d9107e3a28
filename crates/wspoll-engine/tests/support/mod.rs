//! Shared helpers: a blocking raw peer on the far end of a socket pair.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use wspoll_core::protocol::{encode_frame, extract_payload, parse_header, FrameError, FrameHeader};
use wspoll_engine::{ConnectionId, ErrorCode, ReadCode, Server, Update};

pub const REQUEST: &str = "GET /chat HTTP/1.1\r\n\
    Host: localhost\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

pub const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

pub struct Peer {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl Peer {
    pub fn new(stream: UnixStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Masked, as a client must send it.
    pub fn send_frame(&mut self, opcode: u8, payload: &[u8], fin: bool) {
        let frame = encode_frame(payload, opcode, fin, 0, Some(MASK)).unwrap();
        self.send(&frame);
    }

    pub fn send_close(&mut self, code: u16, reason: &str) {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        self.send_frame(0x8, &payload, true);
    }

    fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).unwrap();
        assert!(n > 0, "unexpected EOF from engine");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    pub fn read_head(&mut self) -> String {
        loop {
            if let Some(end) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head: Vec<u8> = self.buf.drain(..end + 4).collect();
                return String::from_utf8(head).unwrap();
            }
            self.fill();
        }
    }

    pub fn read_frame(&mut self) -> (FrameHeader, Vec<u8>) {
        loop {
            if let Some(header) = parse_header(&self.buf) {
                match extract_payload(&self.buf, &header) {
                    Ok(payload) => {
                        self.buf.drain(..header.frame_len() as usize);
                        return (header, payload.to_vec());
                    }
                    Err(FrameError::Incomplete) => {}
                    Err(e) => panic!("engine sent a bad frame: {e}"),
                }
            }
            self.fill();
        }
    }

    /// Next frame must be a close; returns its code and reason.
    pub fn read_close(&mut self) -> (u16, String) {
        let (header, payload) = self.read_frame();
        assert_eq!(header.opcode, 0x8, "expected close frame");
        assert!(!header.masked, "server frames are never masked");
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        (code, String::from_utf8(payload[2..].to_vec()).unwrap())
    }

    pub fn is_eof(&mut self) -> bool {
        if !self.buf.is_empty() {
            return false;
        }
        let mut b = [0u8; 1];
        matches!(self.stream.read(&mut b), Ok(0))
    }
}

/// Run `cycles` short poll cycles and collect every update.
pub fn pump(server: &mut Server, cycles: usize) -> Vec<Update> {
    let mut all = Vec::new();
    for _ in 0..cycles {
        all.extend(server.update(Some(Duration::from_millis(1))));
    }
    all
}

/// Add a raw peer to `server` without sending anything.
pub fn attach(server: &mut Server) -> (ConnectionId, Peer) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let id = server.add_transport(Box::new(ours)).unwrap();
    (id, Peer::new(theirs))
}

/// Attach a peer, complete the opening handshake and return the 101 head.
pub fn open(server: &mut Server) -> (ConnectionId, Peer, String) {
    let (id, mut peer) = attach(server);
    peer.send(REQUEST.as_bytes());
    let ups = pump(server, 2);
    assert_eq!(read_codes(&ups), vec![ReadCode::NewConnection]);
    server.accept(id).unwrap();
    pump(server, 40);
    let head = peer.read_head();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    (id, peer, head)
}

pub fn read_codes(ups: &[Update]) -> Vec<ReadCode> {
    ups.iter().filter_map(Update::read_code).collect()
}

pub fn error_codes(ups: &[Update]) -> Vec<ErrorCode> {
    ups.iter().filter_map(Update::error_code).collect()
}

pub fn count(ups: &[Update], code: ReadCode) -> usize {
    ups.iter().filter(|u| u.read_code() == Some(code)).count()
}

/// Index of the first update matching `pred`.
pub fn position(ups: &[Update], pred: impl Fn(&Update) -> bool) -> usize {
    ups.iter().position(pred).expect("update not found")
}
