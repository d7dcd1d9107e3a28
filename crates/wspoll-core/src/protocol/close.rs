//! Close codes and close-frame payloads (RFC 6455 §7.4).

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::MAX_CONTROL_PAYLOAD;

const MAX_REASON_BYTES: usize = MAX_CONTROL_PAYLOAD as usize - 2;

/// Close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    EndpointClosing,
    /// 1002
    ProtocolError,
    /// 1003
    UnsupportedPayload,
    /// 1005, local use only.
    NoStatus,
    /// 1006, local use only.
    AbnormalDisconnect,
    /// 1007
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    TooLarge,
    /// 1010
    ExtensionNegotiationFailure,
    /// 1011
    UnexpectedCondition,
    /// 1015, local use only.
    TlsHandshakeFailure,
    /// 3000..=4999
    Application(u16),
    /// Anything else (reserved or unassigned).
    Other(u16),
}

impl CloseCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::EndpointClosing,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedPayload,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::AbnormalDisconnect,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooLarge,
            1010 => CloseCode::ExtensionNegotiationFailure,
            1011 => CloseCode::UnexpectedCondition,
            1015 => CloseCode::TlsHandshakeFailure,
            3000..=4999 => CloseCode::Application(code),
            other => CloseCode::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::EndpointClosing => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedPayload => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::AbnormalDisconnect => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooLarge => 1009,
            CloseCode::ExtensionNegotiationFailure => 1010,
            CloseCode::UnexpectedCondition => 1011,
            CloseCode::TlsHandshakeFailure => 1015,
            CloseCode::Application(c) | CloseCode::Other(c) => c,
        }
    }

    /// Whether the code is acceptable.
    ///
    /// `received` is true for codes read off the wire, where the local-only
    /// codes (1005, 1006, 1015) are invalid.
    pub fn is_valid(self, received: bool) -> bool {
        match self {
            CloseCode::Normal
            | CloseCode::EndpointClosing
            | CloseCode::ProtocolError
            | CloseCode::UnsupportedPayload
            | CloseCode::InvalidPayload
            | CloseCode::PolicyViolation
            | CloseCode::TooLarge
            | CloseCode::ExtensionNegotiationFailure
            | CloseCode::UnexpectedCondition
            | CloseCode::Application(_) => true,
            CloseCode::NoStatus | CloseCode::AbnormalDisconnect | CloseCode::TlsHandshakeFailure => {
                !received
            }
            CloseCode::Other(_) => false,
        }
    }
}

/// Decoded close payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Decode a received close payload, substituting `ProtocolError` when the
    /// peer sent an invalid code or a non-UTF-8 reason.
    ///
    /// An empty payload reads as `Normal`.
    pub fn from_payload(payload: &[u8]) -> Self {
        let [hi, lo, rest @ ..] = payload else {
            return Self::new(CloseCode::Normal, "");
        };

        let raw = u16::from_be_bytes([*hi, *lo]);
        let code = CloseCode::from_u16(raw);
        if !code.is_valid(true) {
            return Self::new(
                CloseCode::ProtocolError,
                format!("Invalid close code provided: {raw}"),
            );
        }

        match std::str::from_utf8(rest) {
            Ok(reason) => Self::new(code, reason),
            Err(_) => Self::new(
                CloseCode::ProtocolError,
                "Received Non-UTF8 close frame payload",
            ),
        }
    }

    /// Big-endian code followed by the reason bytes.
    ///
    /// The reason is cut at a character boundary so the payload fits a
    /// control frame.
    pub fn to_payload(&self) -> Bytes {
        let mut end = self.reason.len().min(MAX_REASON_BYTES);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let reason = self.reason.get(..end).unwrap_or_default();

        let mut out = BytesMut::with_capacity(2 + reason.len());
        out.put_u16(self.code.as_u16());
        out.put_slice(reason.as_bytes());
        out.freeze()
    }
}
