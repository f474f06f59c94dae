//! Signing helpers shared by the gateway adapters.
//!
//! Most gateways sign the sorted `key=value` concatenation of the request
//! fields with a shared-secret suffix; they differ in hash function, case
//! folding, and how many times the digest is applied. Signature comparison
//! is constant time.

use std::collections::BTreeMap;

/// Join parameters as `k=v&k=v` in key order, skipping empty values and any
/// excluded keys (typically the signature field itself).
pub fn sorted_query(params: &BTreeMap<String, String>, exclude: &[&str]) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

pub fn md5_hex_upper(input: &str) -> String {
    md5_hex(input).to_uppercase()
}

/// `md5(md5(input) + key)` for gateways that double-hash.
pub fn double_md5(input: &str, key: &str) -> String {
    md5_hex(&format!("{}{}", md5_hex(input), key))
}

pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn sha256_hex_upper(input: &str) -> String {
    sha256_hex(input).to_uppercase()
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length, so this cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality over the raw bytes.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Case-insensitive constant-ish signature comparison: signatures are hex,
/// so fold case before the constant-time compare.
pub fn signature_eq(expected: &str, received: &str) -> bool {
    secure_eq(
        expected.to_lowercase().as_bytes(),
        received.trim().to_lowercase().as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sorted_query_orders_and_skips() {
        let p = params(&[("b", "2"), ("a", "1"), ("sign", "x"), ("empty", "")]);
        assert_eq!(sorted_query(&p, &["sign"]), "a=1&b=2");
    }

    #[test]
    fn md5_known_vector() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_hex_upper("abc"), "900150983CD24FB0D6963F7D28E17F72");
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn double_md5_differs_from_single() {
        assert_ne!(double_md5("abc", "key"), md5_hex("abckey"));
        assert_eq!(
            double_md5("abc", "key"),
            md5_hex(&format!("{}key", md5_hex("abc")))
        );
    }

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn signature_eq_is_case_insensitive() {
        assert!(signature_eq("ABCDEF01", "abcdef01"));
        assert!(!signature_eq("abcdef01", "abcdef02"));
    }
}
