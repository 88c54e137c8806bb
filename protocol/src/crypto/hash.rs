//! # Hashing & Text Encodings
//!
//! SHA-256 is the only hash in microchain. Transaction IDs, signing digests,
//! block IDs and Merkle nodes all use it, so there is exactly one function
//! to audit.
//!
//! Binary identifiers (public keys, transaction IDs) are rendered as Base58
//! whenever they become map keys, JSON fields or log fields.

use sha2::{Digest, Sha256};

use crate::codec::CodecError;
use crate::config::HASH_LENGTH;

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; HASH_LENGTH];

/// SHA-256 of `data`.
///
/// # Example
///
/// ```
/// use microchain_protocol::crypto::sha256;
///
/// let h = sha256(b"microchain");
/// assert_eq!(h.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over the concatenation of `parts`, without building the
/// concatenation first.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

/// Base58 (Bitcoin alphabet) rendering of arbitrary bytes.
pub fn to_base58(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

/// Parses a Base58 string.
pub fn from_base58(s: &str) -> Result<Vec<u8>, CodecError> {
    bs58::decode(s)
        .into_vec()
        .map_err(|e| CodecError::Base58(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc"), FIPS 180-2 appendix B.1.
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_concat_equals_hash_of_concatenation() {
        let joined = sha256(b"hello world");
        let parts = sha256_concat(&[&b"hello"[..], &b" "[..], &b"world"[..]]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn base58_roundtrip() {
        let data = [0u8, 0, 1, 2, 3, 255];
        let s = to_base58(&data);
        // Leading zero bytes become leading '1's and survive the trip.
        assert!(s.starts_with("11"));
        assert_eq!(from_base58(&s).unwrap(), data);
    }

    #[test]
    fn base58_rejects_bad_alphabet() {
        // '0', 'O', 'I' and 'l' are not in the Bitcoin alphabet.
        assert!(matches!(from_base58("0OIl"), Err(CodecError::Base58(_))));
    }
}
