//! Payload masking (RFC 6455 §5.3).
//!
//! XOR with a repeating 4-byte key. Applying the same key twice restores the
//! input, so one function serves both directions.

/// Mask or unmask `payload` in place.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}

/// Fresh random masking key.
pub fn random_key() -> [u8; 4] {
    rand::random()
}
