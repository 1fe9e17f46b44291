//! Digest verification for fetched blocks (C2).
//!
//! Pure, synchronous: recomputes SHA-256 over the block's bytes, base64-encodes
//! it, and compares against the checksum the server returned alongside the
//! block data. No retry or I/O happens here — a mismatch is treated as fatal
//! corruption by the caller (spec §4.2).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

/// Returns `true` iff `expected` (base64-encoded SHA-256) matches the digest
/// of `data`.
///
/// Comparison is exact bytestring equality of the base64 text, not padding- or
/// case-insensitive — the server is authoritative on encoding.
#[must_use]
pub fn verify(data: &[u8], expected: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let actual = BASE64.encode(digest);
    actual == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        // sha256("") base64-encoded
        assert!(verify(
            b"",
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        ));
    }

    #[test]
    fn rejects_corrupted_data() {
        assert!(!verify(b"test1234", "aGVsbG8="));
    }

    #[test]
    fn rejects_mismatched_digest_of_similar_data() {
        let expected_for_a = {
            let mut hasher = Sha256::new();
            hasher.update(b"aaaa");
            BASE64.encode(hasher.finalize())
        };
        assert!(!verify(b"aaab", &expected_for_a));
    }

    #[test]
    fn accepts_large_block() {
        let data = vec![0x41u8; 512 * 1024];
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let expected = BASE64.encode(hasher.finalize());
        assert!(verify(&data, &expected));
    }
}
