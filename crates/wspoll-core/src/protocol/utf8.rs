//! Incremental UTF-8 validation.
//!
//! Table-driven DFA after Bjoern Hoehrmann
//! (<http://bjoern.hoehrmann.de/utf-8/decoder/dfa/>). The first 256 entries
//! map a byte to its character class, the remaining 144 are the transition
//! table indexed by `state * 16 + class`. The state survives across calls so
//! a text message can be checked fragment by fragment.

pub const UTF8_ACCEPT: u8 = 0;
pub const UTF8_REJECT: u8 = 1;

#[rustfmt::skip]
static UTF8D: [u8; 400] = [
    // byte -> class
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 00..1f
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 20..3f
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 40..5f
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 60..7f
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,9, // 80..9f
    7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7, // a0..bf
    8,8,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2, // c0..df
    0xa,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x4,0x3,0x3, // e0..ef
    0xb,0x6,0x6,0x6,0x5,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8, // f0..ff
    // state * 16 + class -> state
    0x0,0x1,0x2,0x3,0x5,0x8,0x7,0x1,0x1,0x1,0x4,0x6,0x1,0x1,0x1,0x1, // s0
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,0,1,1,1,1,1,0,1,0,1,1,1,1,1,1, // s1..s2
    1,2,1,1,1,1,1,2,1,2,1,1,1,1,1,1,1,1,1,1,1,1,1,2,1,1,1,1,1,1,1,1, // s3..s4
    1,2,1,1,1,1,1,1,1,2,1,1,1,1,1,1,1,1,1,1,1,1,1,3,1,3,1,1,1,1,1,1, // s5..s6
    1,3,1,1,1,1,1,3,1,3,1,1,1,1,1,1,1,3,1,1,1,1,1,1,1,1,1,1,1,1,1,1, // s7..s8
];

/// Feed `bytes` through the DFA starting from `*state`.
///
/// Returns `false` on the first invalid byte and leaves `*state` at
/// [`UTF8_REJECT`]. A `true` result only means "no error so far"; the input
/// is complete UTF-8 only if `*state == UTF8_ACCEPT` afterwards.
pub fn validate_utf8(bytes: &[u8], state: &mut u8) -> bool {
    for &b in bytes {
        let class = UTF8D[usize::from(b)];
        *state = UTF8D[256 + usize::from(*state) * 16 + usize::from(class)];
        if *state == UTF8_REJECT {
            return false;
        }
    }
    true
}

/// Validator state for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Validator {
    state: u8,
}

impl Default for Utf8Validator {
    fn default() -> Self {
        Self { state: UTF8_ACCEPT }
    }
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next fragment. Once rejected, stays rejected until [`reset`](Self::reset).
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        if self.state == UTF8_REJECT {
            return false;
        }
        validate_utf8(bytes, &mut self.state)
    }

    /// True when everything fed so far ends on a character boundary.
    pub fn is_complete(&self) -> bool {
        self.state == UTF8_ACCEPT
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = UTF8_ACCEPT;
    }
}
