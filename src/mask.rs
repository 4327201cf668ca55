//! Payload masking ([RFC 6455 Section 5.3](https://datatracker.ietf.org/doc/html/rfc6455#section-5.3)).
//!
//! Byte `i` of the payload is XORed with `mask[i % 4]`. Applying the same key twice
//! restores the original bytes, so one function serves for masking and unmasking.

/// Masks or unmasks `buf` in place with `mask`.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    apply_mask_words(buf, mask);
}

/// Byte-by-byte reference implementation.
#[inline]
fn apply_mask_bytes(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// XORs whole 4-byte words at a time. Every chunk starts at a multiple of four, so the
/// key never needs rotating and the tail restarts at `mask[0]`.
#[inline]
fn apply_mask_words(buf: &mut [u8], mask: [u8; 4]) {
    let key = u32::from_ne_bytes(mask);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }

    apply_mask_bytes(chunks.into_remainder(), mask);
}
