//! Frame opcodes (RFC 6455 §5.2).

/// Every opcode this implementation understands.
///
/// The 4-bit wire field admits 16 values; 0x3..=0x7 and 0xB..=0xF are
/// reserved and map to `None` in [`Opcode::from_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// Close, ping and pong.
    pub fn is_control(self) -> bool {
        is_control(self.as_u8())
    }

    /// Frames that jump ahead of queued data.
    ///
    /// Close is a control opcode but is never prioritized: a close that
    /// overtakes queued data would make the peer read data after the close.
    pub fn is_priority(self) -> bool {
        matches!(self, Opcode::Ping | Opcode::Pong)
    }
}

/// Raw-value control test (the whole 0x8..=0xF range).
pub fn is_control(raw: u8) -> bool {
    (0x8..=0xF).contains(&raw)
}
