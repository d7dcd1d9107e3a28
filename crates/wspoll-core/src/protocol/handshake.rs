//! Opening handshake text (RFC 6455 §4).
//!
//! Only as much HTTP as the upgrade needs: one request or status line,
//! `key: value` header lines, and the fixed response shapes we emit.

use std::collections::HashMap;

use base64::prelude::*;
use sha1::{Digest, Sha1};

/// Appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// End of the HTTP head.
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Offset of `\r\n\r\n` in `buf`, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

/// Parsed request or response head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHead {
    /// Request method (requests only).
    pub method: Option<String>,
    /// Request target (requests only).
    pub path: Option<String>,
    /// Status code (responses only).
    pub status: Option<u16>,
    pub status_text: Option<String>,
    /// Header map with lower-cased names.
    pub headers: HashMap<String, String>,
}

impl HttpHead {
    /// Parse a head without its terminating blank line.
    ///
    /// Non-UTF-8 bytes are replaced rather than rejected; the validation
    /// step decides what is acceptable.
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));
        let mut head = HttpHead::default();

        if let Some(first) = lines.next() {
            let first = first.trim();
            if first.starts_with("HTTP/") {
                let mut parts = first.splitn(3, ' ');
                let _version = parts.next();
                head.status = parts.next().and_then(|c| c.trim().parse().ok());
                head.status_text = parts.next().map(|s| s.trim().to_string());
            } else {
                let mut parts = first.split_whitespace();
                head.method = parts.next().map(str::to_string);
                head.path = parts.next().map(str::to_string);
            }
        }

        for line in lines {
            if let Some((k, v)) = line.split_once(':') {
                head.headers
                    .insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
            }
        }

        head
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Check a client upgrade request.
///
/// Returns the `Sec-WebSocket-Key` on success, or the HTTP status to answer with.
pub fn validate_upgrade_request(head: &HttpHead) -> Result<String, u16> {
    if !head
        .method
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("GET"))
    {
        return Err(405);
    }
    if head.header("host").is_none() {
        return Err(400);
    }
    if !head
        .header("upgrade")
        .is_some_and(|u| u.eq_ignore_ascii_case("websocket"))
    {
        return Err(400);
    }
    if !head
        .header("connection")
        .is_some_and(|c| c.to_ascii_lowercase().contains("upgrade"))
    {
        return Err(400);
    }
    let Some(key) = head.header("sec-websocket-key") else {
        return Err(400);
    };
    if head
        .header("sec-websocket-version")
        .and_then(|v| v.trim().parse::<u32>().ok())
        != Some(13)
    {
        return Err(426);
    }
    Ok(key.to_string())
}

/// `base64(SHA1(key + GUID))`
pub fn accept_token(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Random `Sec-WebSocket-Key` (16 bytes, base64).
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(nonce)
}

/// Client upgrade request.
pub fn client_request(path: &str, host: &str, user_agent: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: {user_agent}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Server `101` response.
pub fn switching_protocols(accept: &str, server: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Server: {server}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Bare status response used by `deny`.
pub fn status_response(code: u16, server: &str) -> String {
    let text = status_text(code).unwrap_or("Unknown");
    format!("HTTP/1.1 {code} {text}\r\nServer: {server}\r\n\r\n")
}

/// Status response with a minimal HTML body, sent on handshake failure.
pub fn error_page(code: u16, server: &str) -> String {
    let text = status_text(code).unwrap_or("Unknown error code");
    format!(
        "HTTP/1.1 {code} {text}\r\nServer: {server}\r\n\r\n\
         <html><head><title>{code} {text}</title></head><body>\
         <h1>{code} {text}</h1><hr><div>{server}</div></body></html>\r\n\r\n"
    )
}

pub fn status_text(code: u16) -> Option<&'static str> {
    let text = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    };
    Some(text)
}
