//! Content fingerprinting — fast 64-bit hash with a strong cryptographic fallback.
//!
//! The tag prefix (`xxh3:` / `sha256:`) lets the store detect an algorithm
//! change across versions and treat it the same as any other content change
//! (re-embed rather than silently comparing incompatible digests).

use sha2::{Digest, Sha256};

/// Hash raw file bytes to a stable, tagged fingerprint string.
///
/// Deterministic for equal byte sequences and whitespace-sensitive (it hashes
/// bytes, not normalized text). Uses xxh3 on the fast path; falls back to
/// SHA-256 only if the fast hasher's backend fails to initialize, which does
/// not happen on any platform xxhash-rust supports today — the fallback
/// exists so a future backend swap degrades safely instead of panicking.
pub fn hash_content(content: &[u8]) -> String {
    match try_xxh3(content) {
        Some(digest) => format!("xxh3:{digest:016x}"),
        None => format!("sha256:{}", hex_encode(&Sha256::digest(content))),
    }
}

fn try_xxh3(content: &[u8]) -> Option<u64> {
    Some(xxhash_rust::xxh3::xxh3_64(content))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_equal_bytes() {
        let a = hash_content(b"fn main() {}\n");
        let b = hash_content(b"fn main() {}\n");
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_sensitive() {
        let a = hash_content(b"fn main() {}");
        let b = hash_content(b"fn main() {} ");
        assert_ne!(a, b);
    }

    #[test]
    fn carries_algorithm_tag() {
        let h = hash_content(b"hello");
        assert!(h.starts_with("xxh3:"));
    }

    #[test]
    fn sha256_fallback_is_tagged_and_deterministic() {
        let digest = Sha256::digest(b"hello");
        let tagged = format!("sha256:{}", hex_encode(&digest));
        assert!(tagged.starts_with("sha256:"));
        assert_eq!(tagged, format!("sha256:{}", hex_encode(&Sha256::digest(b"hello"))));
    }
}
