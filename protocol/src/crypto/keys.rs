//! # Key Management
//!
//! P-256 (secp256r1) ECDSA identities for microchain nodes.
//!
//! Every node owns exactly one [`KeyPair`] at a time. Its public half is the
//! node's identity on the network: it keys the routing table, it names the
//! parties of a transaction, and it generates blocks.
//!
//! ## Wire shapes
//!
//! - Public key: 64 bytes, `X (32) ‖ Y (32)`. The SEC1 `0x04` tag is implied.
//! - Private key: the 32-byte scalar.
//! - Signature: 64 bytes, `r (32) ‖ s (32)`.
//!
//! Signatures are always computed over a SHA-256 digest that the caller
//! has already produced. We never hash inside `sign`, so the transaction
//! and block code decide exactly which bytes are covered.
//!
//! ## Security considerations
//!
//! - Key generation pulls from `OsRng`. An RNG failure is reported, not
//!   papered over.
//! - Private key bytes never appear in `Debug` output or logs.

use std::fmt;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::codec::fit_bytes_into_width;
use crate::config::{PRIVATE_KEY_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::crypto::hash::{from_base58, sha256, to_base58, Hash};

/// SEC1 tag for an uncompressed point.
const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// Errors that can occur during key operations.
///
/// Kept vague on purpose: details about why key material was rejected are
/// of more use to an attacker than to an operator.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("system rng failure: {0}")]
    Rng(String),

    #[error("invalid private key bytes")]
    InvalidPrivateKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("signing failed")]
    Signing,
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// The public half of a node identity.
///
/// Serialized as a Base58 string in JSON, as 64 raw bytes on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Builds a key from a slice that must be exactly 64 bytes long.
    ///
    /// The bytes are not checked to be a point on the curve; verification
    /// does that and simply fails for garbage keys.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; PUBLIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        to_base58(&self.0)
    }

    pub fn from_base58(s: &str) -> Result<Self, KeyError> {
        let bytes = from_base58(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }

    /// SHA-256 of the key, the commitment carried in
    /// [`TxOutput::next_public_key_hash`](crate::transaction::TxOutput).
    pub fn digest(&self) -> Hash {
        sha256(&self.0)
    }

    fn verifying_key(&self) -> Option<VerifyingKey> {
        let mut sec1 = [0u8; PUBLIC_KEY_LENGTH + 1];
        sec1[0] = SEC1_UNCOMPRESSED_TAG;
        sec1[1..].copy_from_slice(&self.0);
        VerifyingKey::from_sec1_bytes(&sec1).ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b58 = self.to_base58();
        write!(f, "PublicKey({}…)", &b58[..b58.len().min(12)])
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        PublicKey::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A 64-byte `r ‖ s` ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A node's signing identity.
///
/// Does not implement `Serialize`. Exporting a private key has to be spelled
/// out with [`private_key_bytes`](Self::private_key_bytes).
///
/// # Examples
///
/// ```
/// use microchain_protocol::crypto::{sha256, verify_signature, KeyPair};
///
/// let kp = KeyPair::generate().unwrap();
/// let digest = sha256(b"hello");
/// let sig = kp.sign(&digest).unwrap();
/// assert!(verify_signature(&kp.public_key(), sig.as_bytes(), &digest));
/// ```
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key from the OS RNG.
    ///
    /// Fails only when the RNG itself fails. Candidate scalars outside the
    /// curve order (probability ~2^-32) are redrawn.
    pub fn generate() -> Result<Self, KeyError> {
        let mut seed = [0u8; PRIVATE_KEY_LENGTH];
        loop {
            OsRng
                .try_fill_bytes(&mut seed)
                .map_err(|e| KeyError::Rng(e.to_string()))?;
            if let Ok(kp) = Self::from_private_bytes(&seed) {
                return Ok(kp);
            }
        }
    }

    /// Rebuilds a keypair from its 32-byte private scalar.
    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(KeyError::InvalidPrivateKey);
        }
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        let public_key = encode_public_key(signing_key.verifying_key())?;
        Ok(Self {
            signing_key,
            public_key,
        })
    }

    /// Hex convenience for config files and the CLI.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        Self::from_private_bytes(&bytes)
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Exports the private scalar. Handle with care.
    pub fn private_key_bytes(&self) -> [u8; PRIVATE_KEY_LENGTH] {
        self.signing_key.to_bytes().into()
    }

    /// Signs a 32-byte digest.
    pub fn sign(&self, digest: &Hash) -> Result<Signature, KeyError> {
        let sig: EcdsaSignature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|_| KeyError::Signing)?;
        let mut out = [0u8; SIGNATURE_LENGTH];
        out.copy_from_slice(&sig.to_bytes());
        Ok(Signature(out))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(pub={})", self.public_key)
    }
}

fn encode_public_key(vk: &VerifyingKey) -> Result<PublicKey, KeyError> {
    let point = vk.to_encoded_point(false);
    let bytes = point.as_bytes();
    if bytes.len() != PUBLIC_KEY_LENGTH + 1 || bytes[0] != SEC1_UNCOMPRESSED_TAG {
        return Err(KeyError::InvalidPublicKey);
    }
    PublicKey::try_from_slice(&bytes[1..])
}

/// Checks `signature` over `digest` against `public_key`.
///
/// `signature` may arrive with its leading zeros stripped (see
/// [`strip_leading`](crate::codec::strip_leading)); it is re-fitted to 64
/// bytes first. Malformed keys and signatures are simply invalid.
pub fn verify_signature(public_key: &PublicKey, signature: &[u8], digest: &Hash) -> bool {
    if signature.is_empty() || signature.len() > SIGNATURE_LENGTH {
        return false;
    }
    let Some(vk) = public_key.verifying_key() else {
        return false;
    };
    let fitted = fit_bytes_into_width(signature, SIGNATURE_LENGTH);
    let Ok(sig) = EcdsaSignature::from_slice(&fitted) else {
        return false;
    };
    vk.verify_prehash(digest, &sig).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::strip_leading;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = KeyPair::generate().unwrap();
        let digest = sha256(b"accept 1, reject 0");
        let sig = kp.sign(&digest).unwrap();
        assert!(verify_signature(&kp.public_key(), sig.as_bytes(), &digest));
    }

    #[test]
    fn wrong_digest_fails() {
        let kp = KeyPair::generate().unwrap();
        let sig = kp.sign(&sha256(b"one")).unwrap();
        assert!(!verify_signature(&kp.public_key(), sig.as_bytes(), &sha256(b"two")));
    }

    #[test]
    fn wrong_key_fails() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let digest = sha256(b"hello");
        let sig = alice.sign(&digest).unwrap();
        assert!(!verify_signature(&bob.public_key(), sig.as_bytes(), &digest));
    }

    #[test]
    fn every_single_bit_flip_in_signature_fails() {
        let kp = KeyPair::generate().unwrap();
        let digest = sha256(b"flip me");
        let sig = kp.sign(&digest).unwrap();
        for bit in 0..SIGNATURE_LENGTH * 8 {
            let mut bad = sig.to_vec();
            bad[bit / 8] ^= 1 << (bit % 8);
            assert!(
                !verify_signature(&kp.public_key(), &bad, &digest),
                "bit {} flipped and signature still verified",
                bit
            );
        }
    }

    #[test]
    fn stripped_signature_still_verifies() {
        let kp = KeyPair::generate().unwrap();
        let digest = sha256(b"padding");
        let sig = kp.sign(&digest).unwrap();
        let stripped = strip_leading(sig.as_bytes(), 0);
        assert!(verify_signature(&kp.public_key(), stripped, &digest));
    }

    #[test]
    fn garbage_inputs_are_false_not_panics() {
        let kp = KeyPair::generate().unwrap();
        let digest = sha256(b"x");
        let garbage_key = PublicKey::from_bytes([7u8; PUBLIC_KEY_LENGTH]);
        let sig = kp.sign(&digest).unwrap();
        assert!(!verify_signature(&garbage_key, sig.as_bytes(), &digest));
        assert!(!verify_signature(&kp.public_key(), &[], &digest));
        assert!(!verify_signature(&kp.public_key(), &[1u8; 65], &digest));
        assert!(!verify_signature(&kp.public_key(), &[0xFFu8; 64], &digest));
    }

    #[test]
    fn private_key_roundtrip() {
        let kp = KeyPair::generate().unwrap();
        let restored = KeyPair::from_private_bytes(&kp.private_key_bytes()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());

        let from_hex = KeyPair::from_hex(&hex::encode(kp.private_key_bytes())).unwrap();
        assert_eq!(kp.public_key(), from_hex.public_key());
    }

    #[test]
    fn rejects_bad_private_keys() {
        assert!(KeyPair::from_private_bytes(&[1u8; 31]).is_err());
        // Zero is not a valid scalar.
        assert!(KeyPair::from_private_bytes(&[0u8; 32]).is_err());
        assert!(KeyPair::from_hex("not hex").is_err());
    }

    #[test]
    fn generated_keys_differ() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn public_key_base58_and_json() {
        let pk = KeyPair::generate().unwrap().public_key();
        assert_eq!(PublicKey::from_base58(&pk.to_base58()).unwrap(), pk);

        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", pk.to_base58()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }

    #[test]
    fn public_key_rejects_wrong_length() {
        assert!(PublicKey::try_from_slice(&[1u8; 63]).is_err());
        assert!(PublicKey::from_base58(&to_base58(&[1u8; 32])).is_err());
    }

    #[test]
    fn debug_does_not_leak_private_key() {
        let kp = KeyPair::generate().unwrap();
        let dbg = format!("{:?}", kp);
        assert!(dbg.starts_with("KeyPair(pub="));
        assert!(!dbg.contains(&hex::encode(kp.private_key_bytes())));
    }
}
