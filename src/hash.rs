//! Component A — Content Hasher (spec.md §4.A).
//!
//! djb2-xor over the UTF-16 code-point sequence, seed 5381. Fast, not
//! cryptographic; cache correctness only ever relies on it to short-circuit
//! an expensive rebuild, never as a unique identifier guarantee.

const SEED: u32 = 5381;

/// `hash = (hash * 33) ^ code_unit`, rendered as base-36.
pub fn content_hash(source: &str) -> u32 {
    let mut hash: u32 = SEED;
    for unit in source.encode_utf16() {
        hash = hash.wrapping_mul(33) ^ u32::from(unit);
    }
    hash
}

/// Base-36 rendering of a hash, matching the wire format cache keys use.
pub fn to_base36(mut value: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = Vec::with_capacity(13);
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 alphabet is ascii")
}

/// Convenience: hash then render, the form most call sites want.
pub fn hash_base36(source: &str) -> String {
    to_base36(content_hash(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(content_hash("const x = 1;"), content_hash("const x = 1;"));
    }

    #[test]
    fn empty_is_not_undefined() {
        // There's no "undefined" in Rust, but the empty-string hash must
        // still be a normal, stable value distinct from not-yet-hashed.
        assert_eq!(content_hash(""), SEED);
    }

    #[test]
    fn differs_on_change() {
        assert_ne!(content_hash("const x = 1;"), content_hash("const x = 2;"));
    }

    #[test]
    fn base36_roundtrips_through_radix() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
