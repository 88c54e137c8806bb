//! # Cryptographic Primitives for microchain
//!
//! Two primitives, both boring on purpose:
//!
//! - **ECDSA over P-256** for node identities and transaction signatures.
//! - **SHA-256** for every digest: transaction IDs, signing digests, block
//!   IDs, Merkle nodes, next-key commitments.
//!
//! Both are thin wrappers around the RustCrypto implementations. If you are
//! tempted to optimize them, don't.

pub mod hash;
pub mod keys;

pub use hash::{from_base58, sha256, sha256_concat, to_base58, Hash};
pub use keys::{verify_signature, KeyError, KeyPair, PublicKey, Signature};
