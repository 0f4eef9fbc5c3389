//! Deterministic byte encoding for everything that gets hashed or signed.
//!
//! Signatures must verify across processes and implementations, so the
//! preimages are specified bit-exactly here rather than derived from a
//! serialization framework:
//!
//! - every preimage starts with a one-byte codec version followed by an
//!   ASCII domain tag, so transaction and block digests can never collide;
//! - integers are fixed-width big-endian (`u32`/`u64`/`i64`);
//! - strings are a `u32` big-endian byte length followed by the UTF-8
//!   bytes, which keeps adjacent fields unambiguous;
//! - amounts are integer minor units and timestamps are milliseconds since
//!   the Unix epoch, so no float or locale formatting is ever hashed.

use sha2::{Digest, Sha256};

pub const CODEC_VERSION: u8 = 1;

/// Domain tag for transaction digests.
pub const DOM_TX: &[u8] = b"TX1";

/// Domain tag for block hash preimages.
pub const DOM_BLOCK: &[u8] = b"BLK1";

pub fn put_u32(dst: &mut Vec<u8>, x: u32) {
    dst.extend_from_slice(&x.to_be_bytes());
}

pub fn put_u64(dst: &mut Vec<u8>, x: u64) {
    dst.extend_from_slice(&x.to_be_bytes());
}

pub fn put_i64(dst: &mut Vec<u8>, x: i64) {
    dst.extend_from_slice(&x.to_be_bytes());
}

/// Appends a string as `u32` big-endian length + UTF-8 bytes.
pub fn put_str(dst: &mut Vec<u8>, s: &str) {
    put_u32(dst, s.len() as u32);
    dst.extend_from_slice(s.as_bytes());
}

/// SHA-256 over a fully assembled preimage.
pub fn sha256(preimage: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(preimage);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_keeps_adjacent_strings_unambiguous() {
        // ("ab", "c") and ("a", "bc") concatenate to the same bytes without
        // framing; the length prefix must keep them apart.
        let mut left = Vec::new();
        put_str(&mut left, "ab");
        put_str(&mut left, "c");

        let mut right = Vec::new();
        put_str(&mut right, "a");
        put_str(&mut right, "bc");

        assert_ne!(left, right);
    }

    #[test]
    fn integers_are_fixed_width_big_endian() {
        let mut buf = Vec::new();
        put_u64(&mut buf, 1);
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 0, 1]);

        let mut buf = Vec::new();
        put_i64(&mut buf, -1);
        assert_eq!(buf, [0xff; 8]);
    }

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256(b"hello"), sha256(b"hello"));
        assert_ne!(sha256(b"hello"), sha256(b"hello!"));
    }
}
