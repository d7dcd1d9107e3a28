//! Stateless frame codec (RFC 6455 §5.2).
//!
//! Parsing rules:
//! - Never index into untrusted input; read through `Buf` after `remaining()` checks.
//! - Insufficient input is never an error: `parse_header` returns `None` and
//!   `extract_payload` returns `FrameError::Incomplete` until every byte is present.
//!
//! ```text
//!  byte 0: FIN(1) RSV(3) OPCODE(4)
//!  byte 1: MASK(1) LEN7(7)
//!  LEN7 == 126 -> u16 length, LEN7 == 127 -> u64 length (big-endian)
//!  then the 4-byte masking key iff MASK, then the payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::mask::{apply_mask, random_key};
use super::opcode::{is_control, Opcode};
use crate::error::{Result, WsError};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// RSV1..RSV3 as a 3-bit value (RSV1 is the high bit).
    pub rsv: u8,
    /// Raw 4-bit opcode; see [`FrameHeader::opcode`].
    pub opcode: u8,
    pub masked: bool,
    /// Payload length after extended-length decoding.
    pub length: u64,
    pub masking_key: Option<[u8; 4]>,
    /// Bytes of header preceding the payload.
    pub payload_offset: usize,
}

impl FrameHeader {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Header plus payload.
    pub fn frame_len(&self) -> u64 {
        (self.payload_offset as u64).saturating_add(self.length)
    }
}

/// Reasons a complete frame is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("control frame with {0} byte payload")]
    ControlLength(u64),
    #[error("fragmented control frame")]
    FragmentedControl,
}

impl Violation {
    pub fn as_str(self) -> &'static str {
        match self {
            Violation::UnknownOpcode(_) => "UNKNOWN_OPCODE",
            Violation::ControlLength(_) => "CONTROL_LENGTH",
            Violation::FragmentedControl => "FRAGMENTED_CONTROL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Wait for more bytes.
    #[error("frame incomplete")]
    Incomplete,
    #[error("protocol violation: {0}")]
    Protocol(Violation),
}

/// Parse a frame header from the front of `buf`.
///
/// Returns `None` while `buf` is shorter than the full header, including the
/// extended length and masking key once their presence is known.
pub fn parse_header(buf: &[u8]) -> Option<FrameHeader> {
    let mut cur = buf;
    if cur.remaining() < 2 {
        return None;
    }

    let b0 = cur.get_u8();
    let b1 = cur.get_u8();

    let mut payload_offset = 2;
    let length = match b1 & 0x7F {
        LEN_16 => {
            if cur.remaining() < 2 {
                return None;
            }
            payload_offset += 2;
            u64::from(cur.get_u16())
        }
        LEN_64 => {
            if cur.remaining() < 8 {
                return None;
            }
            payload_offset += 8;
            cur.get_u64()
        }
        n => u64::from(n),
    };

    let masked = b1 & 0x80 != 0;
    let masking_key = if masked {
        if cur.remaining() < 4 {
            return None;
        }
        payload_offset += 4;
        let mut key = [0u8; 4];
        cur.copy_to_slice(&mut key);
        Some(key)
    } else {
        None
    };

    Some(FrameHeader {
        fin: b0 & 0x80 != 0,
        rsv: (b0 >> 4) & 0x07,
        opcode: b0 & 0x0F,
        masked,
        length,
        masking_key,
        payload_offset,
    })
}

/// Extract and unmask the payload of the frame starting at `buf[0]`.
///
/// Opcode and control-frame rules are checked before completeness, so a
/// malformed control frame is rejected without waiting for its payload.
/// A control payload of exactly one byte is rejected for every control
/// opcode, not just close.
pub fn extract_payload(buf: &[u8], header: &FrameHeader) -> std::result::Result<Bytes, FrameError> {
    let opcode = header
        .opcode()
        .ok_or(FrameError::Protocol(Violation::UnknownOpcode(header.opcode)))?;

    if opcode.is_control() {
        if header.length > MAX_CONTROL_PAYLOAD || header.length == 1 {
            return Err(FrameError::Protocol(Violation::ControlLength(header.length)));
        }
        if !header.fin {
            return Err(FrameError::Protocol(Violation::FragmentedControl));
        }
    }

    let end = header.frame_len();
    if (buf.len() as u64) < end {
        return Err(FrameError::Incomplete);
    }

    let body = buf
        .get(header.payload_offset..end as usize)
        .ok_or(FrameError::Incomplete)?;
    let mut payload = BytesMut::from(body);
    if let Some(key) = header.masking_key {
        apply_mask(&mut payload, key);
    }
    Ok(payload.freeze())
}

/// Serialize one frame with an explicit raw opcode, RSV bits and masking key.
pub fn encode_frame(
    payload: &[u8],
    opcode: u8,
    fin: bool,
    rsv: u8,
    mask: Option<[u8; 4]>,
) -> Result<Bytes> {
    if opcode > 0x0F {
        return Err(WsError::InvalidOpcode(opcode));
    }
    if rsv > 0x07 {
        return Err(WsError::InvalidRsv(rsv));
    }
    if is_control(opcode) {
        if !fin {
            return Err(WsError::FragmentedControl);
        }
        if payload.len() as u64 > MAX_CONTROL_PAYLOAD {
            return Err(WsError::ControlLength(payload.len()));
        }
    }

    let len = payload.len();
    let mut out = BytesMut::with_capacity(len + 14);

    let mut b0 = (rsv << 4) | opcode;
    if fin {
        b0 |= 0x80;
    }
    out.put_u8(b0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < usize::from(LEN_16) {
        out.put_u8(mask_bit | len as u8);
    } else if len < 65536 {
        out.put_u8(mask_bit | LEN_16);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | LEN_64);
        out.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            out.put_slice(&key);
            let start = out.len();
            out.put_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.put_slice(payload),
    }

    Ok(out.freeze())
}

/// Serialize one frame; a fresh random key is generated per frame when `mask` is set.
///
/// Unlike [`encode_frame`], a one-byte control payload is refused here since
/// no peer would accept it.
pub fn encode(payload: &[u8], mask: bool, opcode: Opcode, fin: bool) -> Result<Bytes> {
    if opcode.is_control() && payload.len() == 1 {
        return Err(WsError::ControlLength(1));
    }
    encode_frame(payload, opcode.as_u8(), fin, 0, mask.then(random_key))
}
