#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod support;

use std::thread;
use std::time::{Duration, Instant};

use wspoll_core::protocol::Opcode;
use wspoll_engine::config::WsConfig;
use wspoll_engine::{ConnectionOptions, ConnectionState, ErrorCode, ReadCode, Server};

use support::{attach, count, error_codes, open, pump, read_codes, REQUEST, RFC_ACCEPT};

#[test]
fn valid_request_is_accepted() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, _peer, head) = open(&mut server);

    assert!(head.contains(&format!("Sec-WebSocket-Accept: {RFC_ACCEPT}\r\n")));
    assert!(head.contains("Upgrade: websocket\r\n"));
    assert!(head.contains("Server: wspoll/"));

    let conn = server.connection(id).unwrap();
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(conn.path(), Some("/chat"));
    assert_eq!(
        conn.headers().unwrap().get("host").map(String::as_str),
        Some("localhost")
    );
}

#[test]
fn accepting_twice_is_invalid_state() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, _peer, _) = open(&mut server);

    let err = server.accept(id).unwrap_err();
    assert_eq!(err.kind().as_str(), "INVALID_STATE");
    let err = server.deny(id, 403).unwrap_err();
    assert_eq!(err.kind().as_str(), "INVALID_STATE");
}

#[test]
fn writes_before_accept_are_refused() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer) = attach(&mut server);

    assert_eq!(
        server.connection(id).unwrap().state(),
        ConnectionState::AwaitingHandshake
    );
    assert!(server.accept(id).is_err());

    peer.send(REQUEST.as_bytes());
    pump(&mut server, 1);
    let err = server.write(id, b"early", Opcode::Text).unwrap_err();
    assert_eq!(err.kind().as_str(), "INVALID_STATE");
}

#[test]
fn malformed_request_gets_error_page() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer) = attach(&mut server);

    let bad = REQUEST.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
    peer.send(bad.as_bytes());
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadHandshakeFailure]);
    assert_eq!(read_codes(&ups), vec![ReadCode::SockDisconnect]);
    let head = peer.read_head();
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{head}");
    assert!(server.is_empty());
}

#[test]
fn wrong_version_gets_426() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (_, mut peer) = attach(&mut server);

    let old = REQUEST.replace("Sec-WebSocket-Version: 13", "Sec-WebSocket-Version: 8");
    peer.send(old.as_bytes());
    pump(&mut server, 4);
    assert!(peer.read_head().starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
}

#[test]
fn oversized_request_gets_431() {
    let mut server = Server::without_listener(&WsConfig::default());
    server.set_connection_options(ConnectionOptions {
        max_handshake_bytes: 64,
        ..ConnectionOptions::default()
    });
    let (_, mut peer) = attach(&mut server);

    peer.send(&[b'a'; 100]);
    let ups = pump(&mut server, 4);

    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadHandshakeTooLarge]);
    assert_eq!(count(&ups, ReadCode::SockDisconnect), 1);
    let head = peer.read_head();
    assert!(
        head.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"),
        "{head}"
    );
}

#[test]
fn deny_sends_status_and_closes() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer) = attach(&mut server);

    peer.send(REQUEST.as_bytes());
    assert_eq!(read_codes(&pump(&mut server, 1)), vec![ReadCode::NewConnection]);
    server.deny(id, 403).unwrap();
    let ups = pump(&mut server, 3);

    assert_eq!(count(&ups, ReadCode::SockDisconnect), 1);
    assert!(error_codes(&ups).is_empty());
    let head = peer.read_head();
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{head}");
    assert!(peer.is_eof());
}

#[test]
fn unanswered_request_times_out_with_504() {
    let mut server = Server::without_listener(&WsConfig::default());
    server.set_connection_options(ConnectionOptions {
        accept_timeout: Duration::from_millis(10),
        ..ConnectionOptions::default()
    });
    let (id, mut peer) = attach(&mut server);

    peer.send(REQUEST.as_bytes());
    assert_eq!(read_codes(&pump(&mut server, 1)), vec![ReadCode::NewConnection]);

    thread::sleep(Duration::from_millis(30));
    let ups = pump(&mut server, 4);
    assert_eq!(error_codes(&ups), vec![ErrorCode::AcceptTimeoutPassed]);
    assert_eq!(count(&ups, ReadCode::SockDisconnect), 1);
    assert!(peer.read_head().starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));
    assert!(server.connection(id).is_none());
}

#[test]
fn frames_sent_with_the_request_wait_for_accept() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer) = attach(&mut server);

    peer.send(REQUEST.as_bytes());
    peer.send_frame(0x1, b"eager", true);
    let ups = pump(&mut server, 2);
    assert_eq!(read_codes(&ups), vec![ReadCode::NewConnection]);

    server.accept(id).unwrap();
    let ups = pump(&mut server, 2);
    let msg = ups
        .iter()
        .filter_map(|u| u.as_read())
        .find(|r| r.code == ReadCode::Read)
        .expect("buffered frame delivered");
    assert_eq!(msg.message.as_deref(), Some(&b"eager"[..]));
}

#[test]
fn accept_timeout_fires_during_an_unbounded_wait() {
    let mut server = Server::without_listener(&WsConfig::default());
    server.set_connection_options(ConnectionOptions {
        accept_timeout: Duration::from_millis(30),
        ..ConnectionOptions::default()
    });
    let (_, mut peer) = attach(&mut server);

    peer.send(REQUEST.as_bytes());
    assert_eq!(read_codes(&pump(&mut server, 1)), vec![ReadCode::NewConnection]);

    let started = Instant::now();
    let mut ups = Vec::new();
    for _ in 0..5 {
        ups.extend(server.update(None));
        if !error_codes(&ups).is_empty() {
            break;
        }
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(error_codes(&ups), vec![ErrorCode::AcceptTimeoutPassed]);

    pump(&mut server, 4);
    assert!(peer.read_head().starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));
}

#[test]
fn data_piling_up_before_accept_is_cut_off() {
    let mut server = Server::without_listener(&WsConfig::default());
    server.set_connection_options(ConnectionOptions {
        max_handshake_bytes: 1024,
        ..ConnectionOptions::default()
    });
    let (id, mut peer) = attach(&mut server);

    peer.send(REQUEST.as_bytes());
    assert_eq!(read_codes(&pump(&mut server, 1)), vec![ReadCode::NewConnection]);

    for _ in 0..4 {
        peer.send_frame(0x2, &[0u8; 512], true);
    }
    let ups = pump(&mut server, 4);
    assert_eq!(error_codes(&ups), vec![ErrorCode::ReadProtocolError]);
    assert_eq!(count(&ups, ReadCode::SockDisconnect), 1);
    assert!(server.connection(id).is_none());
    assert!(peer.is_eof());
}

#[test]
fn data_within_the_limit_waits_for_accept() {
    let mut server = Server::without_listener(&WsConfig::default());
    let (id, mut peer) = attach(&mut server);

    peer.send(REQUEST.as_bytes());
    peer.send_frame(0x2, &[7u8; 4000], true);
    let ups = pump(&mut server, 3);
    assert!(error_codes(&ups).is_empty());
    assert_eq!(
        server.connection(id).unwrap().state(),
        ConnectionState::AwaitingHandshake
    );

    server.accept(id).unwrap();
    let ups = pump(&mut server, 2);
    assert_eq!(count(&ups, ReadCode::Read), 1);
}
