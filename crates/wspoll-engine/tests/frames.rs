#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod support;

use std::io::Write;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use wspoll_core::protocol::{encode_frame, FrameHeader, Opcode};
use wspoll_engine::config::WsConfig;
use wspoll_engine::update::ReadUpdate;
use wspoll_engine::{ConnectionOptions, ErrorCode, ReadCode, Server, SinkDecision, Update};

use support::{count, error_codes, open, position, pump};

fn messages(ups: &[Update]) -> Vec<&ReadUpdate> {
    ups.iter()
        .filter_map(Update::as_read)
        .filter(|r| r.code == ReadCode::Read)
        .collect()
}

fn server_with(opts: ConnectionOptions) -> Server {
    let mut server = Server::without_listener(&WsConfig::default());
    server.set_connection_options(opts);
    server
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn fragmented_text_is_reassembled() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer, _) = open(&mut server);

    peer.send_frame(0x1, b"ab", false);
    peer.send_frame(0x0, b"cd", true);
    let ups = pump(&mut server, 3);

    let msgs = messages(&ups);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].connection, Some(id));
    assert_eq!(msgs[0].opcode, Some(Opcode::Text));
    assert_eq!(msgs[0].message.as_deref(), Some(&b"abcd"[..]));
    assert!(error_codes(&ups).is_empty());
}

#[test]
fn binary_and_text_messages_keep_arrival_order() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x2, &[1, 2, 3], true);
    peer.send_frame(0x1, b"two", true);
    let ups = pump(&mut server, 3);

    let msgs = messages(&ups);
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].opcode, Some(Opcode::Binary));
    assert_eq!(msgs[0].message.as_deref(), Some(&[1u8, 2, 3][..]));
    assert_eq!(msgs[1].message.as_deref(), Some(&b"two"[..]));
}

#[test]
fn invalid_utf8_closes_with_1007() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer, _) = open(&mut server);

    peer.send_frame(0x1, &[0xC0, 0x80], true);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadInvalidPayload]);
    assert!(messages(&ups).is_empty());
    assert_eq!(peer.read_close().0, 1007);
    assert!(peer.is_eof());

    assert_eq!(count(&ups, ReadCode::SockDisconnect), 1);
    let err = position(&ups, |u| u.error_code().is_some());
    let term = position(&ups, |u| u.read_code() == Some(ReadCode::SockDisconnect));
    assert!(err < term);
    assert!(server.connection(id).is_none());
}

#[test]
fn text_ending_mid_character_is_rejected() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    // first two bytes of U+20AC, then the message ends
    peer.send_frame(0x1, &[0xE2, 0x82], true);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadInvalidPayload]);
    assert_eq!(peer.read_close().0, 1007);
}

#[test]
fn utf8_split_across_fragments_is_accepted() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x1, &[b'x', 0xE2], false);
    peer.send_frame(0x0, &[0x82, 0xAC], true);
    let ups = pump(&mut server, 3);

    let msgs = messages(&ups);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].message.as_deref(), Some("x€".as_bytes()));
}

#[test]
fn rsv_bits_are_a_protocol_error() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    let frame = encode_frame(b"x", 0x1, true, 0b100, Some([9, 9, 9, 9])).unwrap();
    peer.send(&frame);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::RsvBitSet]);
    assert_eq!(peer.read_close().0, 1002);
    assert_eq!(count(&ups, ReadCode::SockDisconnect), 1);
}

#[test]
fn ping_is_reported_and_answered() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer, _) = open(&mut server);

    peer.send_frame(0x9, b"hey", true);
    let ups = pump(&mut server, 3);

    let ping = ups
        .iter()
        .filter_map(Update::as_read)
        .find(|r| r.code == ReadCode::Ping)
        .expect("ping update");
    assert_eq!(ping.connection, Some(id));
    assert_eq!(ping.message.as_deref(), Some(&b"hey"[..]));

    let (header, payload) = peer.read_frame();
    assert_eq!(header.opcode, 0xA);
    assert_eq!(payload, b"hey");
}

#[test]
fn pong_is_reported() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0xA, b"late", true);
    let ups = pump(&mut server, 2);
    assert_eq!(count(&ups, ReadCode::Pong), 1);
}

#[test]
fn control_frame_between_fragments_is_allowed() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x1, b"he", false);
    peer.send_frame(0x9, b"", true);
    peer.send_frame(0x0, b"llo", true);
    let ups = pump(&mut server, 3);

    let ping = position(&ups, |u| u.read_code() == Some(ReadCode::Ping));
    let msg = position(&ups, |u| u.read_code() == Some(ReadCode::Read));
    assert!(ping < msg);
    assert_eq!(messages(&ups)[0].message.as_deref(), Some(&b"hello"[..]));
}

#[test]
fn one_byte_ping_is_a_protocol_error() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x9, b"A", true);
    let ups = pump(&mut server, 4);

    assert_eq!(count(&ups, ReadCode::Ping), 0);
    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadProtocolError]);
    assert_eq!(peer.read_close().0, 1002);
}

#[test]
fn continuation_without_message_is_rejected() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x0, b"orphan", true);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadProtocolError]);
    assert_eq!(peer.read_close().0, 1002);
}

#[test]
fn new_message_inside_fragmented_one_is_rejected() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x1, b"a", false);
    peer.send_frame(0x2, b"b", true);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadInvalidPayload]);
    assert_eq!(peer.read_close().0, 1002);
}

#[test]
fn oversized_ping_is_rejected() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer, _) = open(&mut server);

    // 126-byte ping, built by hand since the encoder refuses it
    let mut frame = vec![0x89, 0x80 | 126, 0x00, 126, 0, 0, 0, 0];
    frame.extend_from_slice(&[0u8; 126]);
    peer.send(&frame);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadProtocolError]);
    assert_eq!(peer.read_close().0, 1002);
}

#[test]
fn message_over_limit_closes_with_1009() {
    let mut server = server_with(ConnectionOptions {
        max_frame_bytes: Some(4),
        max_message_bytes: Some(4),
        ..ConnectionOptions::default()
    });
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x1, b"abc", false);
    peer.send_frame(0x0, b"de", true);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadProtocolError]);
    assert!(messages(&ups).is_empty());
    assert_eq!(peer.read_close().0, 1009);
}

#[test]
fn frame_over_limit_closes_with_1009() {
    let mut server = server_with(ConnectionOptions {
        max_frame_bytes: Some(4),
        max_message_bytes: None,
        ..ConnectionOptions::default()
    });
    let (_, mut peer, _) = open(&mut server);

    peer.send_frame(0x2, b"too long", true);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadProtocolError]);
    assert_eq!(peer.read_close().0, 1009);
}

#[test]
fn sink_receives_streamed_message() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer, _) = open(&mut server);

    let buf = SharedBuf::default();
    let target = buf.clone();
    server
        .connection_mut(id)
        .unwrap()
        .set_sink_strategy(Box::new(move |header: &FrameHeader| {
            assert_eq!(header.opcode, 0x2);
            SinkDecision::Sink(Box::new(target.clone()))
        }));

    peer.send_frame(0x2, b"ab", false);
    peer.send_frame(0x0, b"cd", true);
    let ups = pump(&mut server, 3);

    let msgs = messages(&ups);
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].message.is_none());
    assert!(msgs[0].sink.is_some());
    assert_eq!(msgs[0].opcode, Some(Opcode::Binary));
    assert_eq!(&*buf.0.lock().unwrap(), b"abcd");
}

#[test]
fn denied_sink_closes_with_1003() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer, _) = open(&mut server);
    server
        .connection_mut(id)
        .unwrap()
        .set_sink_strategy(Box::new(|_: &FrameHeader| SinkDecision::Deny));

    peer.send_frame(0x2, b"nope", true);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadNoStreamForNewMessage]);
    assert_eq!(peer.read_close().0, 1003);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_byte_split_yields_the_same_messages(cuts in proptest::collection::vec(1usize..8, 1..12)) {
        let mut server = Server::without_listener(&WsConfig::default());
        let (_, mut peer, _) = open(&mut server);

        let mut wire = encode_frame(b"hello ", 0x1, false, 0, Some([1, 2, 3, 4])).unwrap().to_vec();
        wire.extend_from_slice(&encode_frame(b"world", 0x0, true, 0, Some([5, 6, 7, 8])).unwrap());
        wire.extend_from_slice(&encode_frame(&[0xFF; 3], 0x2, true, 0, Some([9, 9, 9, 9])).unwrap());

        let mut ups = Vec::new();
        let mut rest = &wire[..];
        for cut in cuts {
            if rest.is_empty() {
                break;
            }
            let (now, later) = rest.split_at(cut.min(rest.len()));
            peer.send(now);
            ups.extend(pump(&mut server, 1));
            rest = later;
        }
        peer.send(rest);
        ups.extend(pump(&mut server, 8));

        let msgs = messages(&ups);
        prop_assert_eq!(msgs.len(), 2);
        prop_assert_eq!(msgs[0].message.as_deref(), Some(&b"hello world"[..]));
        prop_assert_eq!(msgs[1].message.as_deref(), Some(&[0xFFu8; 3][..]));
        prop_assert!(error_codes(&ups).is_empty());
    }
}
