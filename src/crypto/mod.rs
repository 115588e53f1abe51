//! Hashing, canonical encoding, and the keyed-hash signature placeholder.
//!
//! Real elliptic-curve signatures are out of scope; `sign`/`verify` here are a
//! stand-in so the rest of the system (nonce ordering, double-spend checks,
//! gossip dedupe) can be exercised without a key-management story.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode `value` as a JSON object with keys in ascending lexicographic order
/// and no whitespace. `serde_json::Value::Object` is backed by a `BTreeMap`
/// by default, so converting through `Value` sorts keys for free; this relies
/// on `serde_json`'s `preserve_order` feature being off (it would swap that
/// map for an insertion-ordered one).
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).expect("value must serialize to JSON");
    serde_json::to_string(&v).expect("canonical value must serialize to a string")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    to_hex(&digest)
}

pub fn sha256_hex_of_canonical<T: Serialize>(value: &T) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// HMAC-SHA-256 over `msg`, keyed by `key`, hex-encoded.
pub fn sign(key: &str, msg: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(msg.as_bytes());
    to_hex(&mac.finalize().into_bytes())
}

/// Recompute the expected signature and constant-time compare against `signature_hex`.
pub fn verify(key: &str, msg: &str, signature_hex: &str) -> bool {
    let expected = sign(key, msg);
    constant_time_eq(expected.as_bytes(), signature_hex.as_bytes())
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let v = json!({"b": 1, "a": 2, "c": 3});
        assert_eq!(canonical_json(&v), r#"{"a":2,"b":1,"c":3}"#);
    }

    #[test]
    fn sha256_empty_string_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sign_verify_round_trip() {
        let sig = sign("alice", "hello");
        assert!(verify("alice", "hello", &sig));
        assert!(!verify("bob", "hello", &sig));
        assert!(!verify("alice", "goodbye", &sig));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }
}
