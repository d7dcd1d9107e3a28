//! Protocol modules (RFC 6455).
//!
//! - `frame`: header parse/serialize and payload extraction.
//! - `mask`: the XOR masking transform.
//! - `opcode` / `close`: closed enumerations for opcodes and close codes.
//! - `utf8`: incremental validator for fragmented text messages.
//! - `handshake`: opening-handshake parsing and response text.
//!
//! All parsers are panic-free and hold no I/O: malformed input becomes a
//! `FrameError`/`Violation` value and partial input simply waits for more bytes.

pub mod close;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod utf8;

pub use close::{CloseCode, CloseReason};
pub use frame::{encode, encode_frame, extract_payload, parse_header, FrameError, FrameHeader, Violation};
pub use mask::apply_mask;
pub use opcode::Opcode;
pub use utf8::Utf8Validator;
