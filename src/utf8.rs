//! UTF-8 validation for text messages and close reasons.
//!
//! With the `simd` feature the check is delegated to `simdutf8`.

#[inline]
pub(crate) fn is_valid(bytes: &[u8]) -> bool {
    #[cfg(not(feature = "simd"))]
    return std::str::from_utf8(bytes).is_ok();
    #[cfg(feature = "simd")]
    return simdutf8::basic::from_utf8(bytes).is_ok();
}
