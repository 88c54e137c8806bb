//! # Block Structure
//!
//! A block batches confirmed transactions under one generator's signature
//! and links to its predecessor by ID. Blocks are not produced on a timer;
//! a node seals one when asked to (see
//! [`Node::seal_block`](crate::network::Node::seal_block)).
//!
//! ## Block Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  BlockHeader (140 bytes)                     │
//! │  ├── generator_id[64]   (public key)         │
//! │  ├── prev_block_id[32]                       │
//! │  ├── merkle_root[32]                         │
//! │  ├── timestamp[4]                            │
//! │  └── transactions_length[8]                  │
//! ├──────────────────────────────────────────────┤
//! │  signature[64]          (over the block ID)  │
//! ├──────────────────────────────────────────────┤
//! │  (len[8] | transaction) * transactions_length│
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The block ID is SHA-256 of the encoded header. The signature is not part
//! of the header: it signs the ID.
//!
//! ## Merkle Root
//!
//! Binary SHA-256 tree over `SHA256(encoded transaction)` leaves. An odd
//! node at any level is paired with itself. Empty blocks have an all-zero
//! root.

use bytes::BufMut;
use thiserror::Error;

use crate::codec::{
    ensure_exhausted, put_fixed, put_len, strip_leading, take_array, take_bytes, take_len,
    take_stripped, take_u32_le, take_u64_le, CodecError,
};
use crate::config::{
    BLOCK_HEADER_LENGTH, BLOCK_ID_LENGTH, HASH_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
    U64_LENGTH,
};
use crate::crypto::{
    sha256, sha256_concat, to_base58, verify_signature, Hash, KeyError, KeyPair, PublicKey,
};
use crate::transaction::{verify_transaction, Transaction, TransactionError};

/// Why a block was refused.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("merkle root does not match the transactions")]
    MerkleMismatch,

    #[error("header announces {announced} transactions, block carries {actual}")]
    CountMismatch { announced: u64, actual: usize },

    #[error("block signature does not verify against the generator")]
    InvalidSignature,

    #[error("transaction {id} in block is invalid: {source}")]
    InvalidTransaction {
        id: String,
        #[source]
        source: TransactionError,
    },

    #[error("block does not extend the chain tip: expected prev {expected}, got {actual}")]
    Disconnected { expected: String, actual: String },
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Everything about a block except its signature and transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Public key of the node that sealed the block.
    pub generator_id: PublicKey,
    /// ID of the previous block, all zeros for the first one.
    pub prev_block_id: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub transactions_length: u64,
}

impl BlockHeader {
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.generator_id.as_bytes());
        buf.put_slice(&self.prev_block_id);
        buf.put_slice(&self.merkle_root);
        buf.put_u32_le(self.timestamp);
        buf.put_u64_le(self.transactions_length);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_LENGTH);
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes exactly one 140-byte header.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != BLOCK_HEADER_LENGTH {
            return Err(CodecError::InvalidLength {
                expected: BLOCK_HEADER_LENGTH,
                actual: data.len(),
            });
        }
        let mut rd = data;
        Ok(Self {
            generator_id: PublicKey::from_bytes(take_array::<PUBLIC_KEY_LENGTH, _>(&mut rd)?),
            prev_block_id: take_array::<BLOCK_ID_LENGTH, _>(&mut rd)?,
            merkle_root: take_array::<HASH_LENGTH, _>(&mut rd)?,
            timestamp: take_u32_le(&mut rd)?,
            transactions_length: take_u64_le(&mut rd)?,
        })
    }

    /// SHA-256 of the encoded header.
    pub fn id(&self) -> Hash {
        sha256(&self.encode())
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// Generator's signature over [`BlockHeader::id`], stripped of leading zeros.
    pub signature: Vec<u8>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assembles and signs a block on top of `prev_block_id`.
    pub fn seal(
        generator: &KeyPair,
        prev_block_id: Hash,
        transactions: Vec<Transaction>,
        timestamp: u32,
    ) -> Result<Self, KeyError> {
        let header = BlockHeader {
            generator_id: generator.public_key(),
            prev_block_id,
            merkle_root: compute_merkle_root(&transactions),
            timestamp,
            transactions_length: transactions.len() as u64,
        };
        let sig = generator.sign(&header.id())?;
        Ok(Self {
            header,
            signature: strip_leading(sig.as_bytes(), 0).to_vec(),
            transactions,
        })
    }

    pub fn id(&self) -> Hash {
        self.header.id()
    }

    pub fn id_base58(&self) -> String {
        to_base58(&self.id())
    }

    /// Looks a transaction up by ID.
    pub fn transaction_by_id(&self, id: &Hash) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id() == id)
    }

    /// Checks count, Merkle root, generator signature and every transaction.
    pub fn verify(&self) -> Result<(), BlockError> {
        if self.header.transactions_length != self.transactions.len() as u64 {
            return Err(BlockError::CountMismatch {
                announced: self.header.transactions_length,
                actual: self.transactions.len(),
            });
        }
        if compute_merkle_root(&self.transactions) != self.header.merkle_root {
            return Err(BlockError::MerkleMismatch);
        }
        if !verify_signature(&self.header.generator_id, &self.signature, &self.id()) {
            return Err(BlockError::InvalidSignature);
        }
        for tx in &self.transactions {
            verify_transaction(tx).map_err(|source| BlockError::InvalidTransaction {
                id: tx.id_base58(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self
            .transactions
            .iter()
            .map(|t| U64_LENGTH + t.encoded_len())
            .sum();
        let mut buf = Vec::with_capacity(BLOCK_HEADER_LENGTH + SIGNATURE_LENGTH + body);
        self.header.encode_into(&mut buf);
        put_fixed(&mut buf, &self.signature, SIGNATURE_LENGTH);
        for tx in &self.transactions {
            put_len(&mut buf, tx.encoded_len());
            tx.encode_into(&mut buf);
        }
        buf
    }

    /// Decodes a block that must occupy all of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let fixed = BLOCK_HEADER_LENGTH + SIGNATURE_LENGTH;
        if data.len() < fixed {
            return Err(CodecError::InvalidLength {
                expected: fixed,
                actual: data.len(),
            });
        }
        let header = BlockHeader::decode(&data[..BLOCK_HEADER_LENGTH])?;
        let mut rd = &data[BLOCK_HEADER_LENGTH..];
        let signature = take_stripped(&mut rd, SIGNATURE_LENGTH)?;

        let mut transactions = Vec::new();
        for _ in 0..header.transactions_length {
            let len = take_len(&mut rd)?;
            let body = take_bytes(&mut rd, len)?;
            transactions.push(Transaction::decode(&body)?);
        }
        ensure_exhausted(&rd, data.len() - rd.len())?;

        Ok(Self {
            header,
            signature,
            transactions,
        })
    }
}

/// Merkle root over the transactions, see the module docs.
pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash {
    if transactions.is_empty() {
        return [0u8; HASH_LENGTH];
    }

    let mut level: Vec<Hash> = transactions.iter().map(|tx| sha256(&tx.encode())).collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                sha256_concat(&[&pair[0][..], &right[..]])
            })
            .collect();
    }

    level[0]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
