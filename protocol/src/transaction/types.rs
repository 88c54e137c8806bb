//! Core transaction records and their binary codec.
//!
//! A [`Transaction`] is a fixed-width [`TransactionHeader`], an opaque
//! `meta` payload and a list of fixed-width [`TxOutput`]s:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ TransactionHeader (340 bytes)                            │
//! │  transaction_id[32] | timestamp[4] | prev_id[32]         │
//! │  requester_pk[64] | requester_sig[64]                    │
//! │  requestee_pk[64] | requestee_sig[64]                    │
//! │  meta_length[8] | output_length[8]                       │
//! ├──────────────────────────────────────────────────────────┤
//! │ meta[meta_length]                                        │
//! ├──────────────────────────────────────────────────────────┤
//! │ outputs[output_length] (48 bytes each)                   │
//! │  accepted[8] | rejected[8] | next_public_key_hash[32]    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Signature slots are zero-padded on the way out and stripped on the way
//! in, so an unsigned slot decodes to an empty signature. Signatures are
//! stored stripped in memory as well, which keeps `decode(encode(tx)) == tx`
//! exact.

use std::cmp::Ordering;
use std::fmt;

use bytes::BufMut;

use crate::codec::{
    checked_span, ensure_exhausted, ensure_remaining, put_fixed, put_len, strip_leading,
    take_array, take_bytes, take_len, take_stripped, take_u32_le, take_u64_le, CodecError,
};
use crate::config::{
    HASH_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, TRANSACTION_HEADER_LENGTH,
    TX_OUTPUT_LENGTH, U64_LENGTH,
};
use crate::crypto::{sha256, sha256_concat, to_base58, Hash, PublicKey};

// ---------------------------------------------------------------------------
// TxOutput
// ---------------------------------------------------------------------------

/// A party's running tally plus a commitment to its next public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutput {
    /// Transactions this party has had accepted so far.
    pub accepted: u64,
    /// Transactions this party has rejected so far.
    pub rejected: u64,
    /// SHA-256 of the public key the party will use next.
    pub next_public_key_hash: Hash,
}

impl TxOutput {
    pub fn new(accepted: u64, rejected: u64, next_public_key: &PublicKey) -> Self {
        Self {
            accepted,
            rejected,
            next_public_key_hash: next_public_key.digest(),
        }
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.accepted);
        buf.put_u64_le(self.rejected);
        buf.put_slice(&self.next_public_key_hash);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TX_OUTPUT_LENGTH);
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes exactly one 48-byte output.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != TX_OUTPUT_LENGTH {
            return Err(CodecError::InvalidLength {
                expected: TX_OUTPUT_LENGTH,
                actual: data.len(),
            });
        }
        let mut rd = data;
        Ok(Self {
            accepted: take_u64_le(&mut rd)?,
            rejected: take_u64_le(&mut rd)?,
            next_public_key_hash: take_array::<HASH_LENGTH, _>(&mut rd)?,
        })
    }
}

// ---------------------------------------------------------------------------
// TransactionHeader
// ---------------------------------------------------------------------------

/// The fixed-size part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHeader {
    /// `SHA256(timestamp_le ‖ requester_public_key ‖ requestee_public_key)`.
    pub transaction_id: Hash,
    /// Unix seconds at creation.
    pub timestamp: u32,
    /// The requester's chain tip when this transaction was created. A genesis
    /// transaction points at itself.
    pub prev_transaction_id: Hash,
    pub requester_public_key: PublicKey,
    /// Stripped of leading zeros; empty while unsigned.
    pub requester_signature: Vec<u8>,
    pub requestee_public_key: PublicKey,
    /// Stripped of leading zeros; empty while unsigned.
    pub requestee_signature: Vec<u8>,
    pub meta_length: u64,
    pub output_length: u64,
}

impl TransactionHeader {
    /// The transaction ID for the given creation inputs.
    pub fn compute_id(timestamp: u32, requester: &PublicKey, requestee: &PublicKey) -> Hash {
        sha256_concat(&[
            &timestamp.to_le_bytes()[..],
            &requester.as_bytes()[..],
            &requestee.as_bytes()[..],
        ])
    }

    /// Writes the 340-byte header. With `with_signatures == false` both
    /// signature slots are written as zeros, which is the form covered by
    /// the signing digest.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B, with_signatures: bool) {
        let empty: &[u8] = &[];
        let (req_sig, ree_sig) = if with_signatures {
            (&self.requester_signature[..], &self.requestee_signature[..])
        } else {
            (empty, empty)
        };

        buf.put_slice(&self.transaction_id);
        buf.put_u32_le(self.timestamp);
        buf.put_slice(&self.prev_transaction_id);
        buf.put_slice(self.requester_public_key.as_bytes());
        put_fixed(buf, req_sig, SIGNATURE_LENGTH);
        buf.put_slice(self.requestee_public_key.as_bytes());
        put_fixed(buf, ree_sig, SIGNATURE_LENGTH);
        buf.put_u64_le(self.meta_length);
        buf.put_u64_le(self.output_length);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TRANSACTION_HEADER_LENGTH);
        self.encode_into(&mut buf, true);
        buf
    }

    /// Decodes exactly one 340-byte header.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != TRANSACTION_HEADER_LENGTH {
            return Err(CodecError::InvalidLength {
                expected: TRANSACTION_HEADER_LENGTH,
                actual: data.len(),
            });
        }
        let mut rd = data;
        Self::read(&mut rd)
    }

    fn read(rd: &mut &[u8]) -> Result<Self, CodecError> {
        ensure_remaining(&*rd, TRANSACTION_HEADER_LENGTH)?;
        Ok(Self {
            transaction_id: take_array::<HASH_LENGTH, _>(rd)?,
            timestamp: take_u32_le(rd)?,
            prev_transaction_id: take_array::<HASH_LENGTH, _>(rd)?,
            requester_public_key: PublicKey::from_bytes(take_array::<PUBLIC_KEY_LENGTH, _>(rd)?),
            requester_signature: take_stripped(rd, SIGNATURE_LENGTH)?,
            requestee_public_key: PublicKey::from_bytes(take_array::<PUBLIC_KEY_LENGTH, _>(rd)?),
            requestee_signature: take_stripped(rd, SIGNATURE_LENGTH)?,
            meta_length: take_u64_le(rd)?,
            output_length: take_u64_le(rd)?,
        })
    }

    /// Field-wise equality that ignores zero padding in the signature slots.
    pub fn equal_with(&self, other: &Self) -> bool {
        self.transaction_id == other.transaction_id
            && self.timestamp == other.timestamp
            && self.prev_transaction_id == other.prev_transaction_id
            && self.requester_public_key == other.requester_public_key
            && strip_leading(&self.requester_signature, 0)
                == strip_leading(&other.requester_signature, 0)
            && self.requestee_public_key == other.requestee_public_key
            && strip_leading(&self.requestee_signature, 0)
                == strip_leading(&other.requestee_signature, 0)
            && self.meta_length == other.meta_length
            && self.output_length == other.output_length
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A directed, dual-signed statement from a requester to a requestee.
///
/// Lifecycle: unsigned → requester-signed (*pending*) → dual-signed
/// (*confirmed*). Use [`TransactionBuilder`](super::TransactionBuilder) to
/// create one and the functions in [`signing`](super::signing) to advance it.
#[derive(Clone, PartialEq, Eq)]
pub struct Transaction {
    pub header: TransactionHeader,
    pub meta: Vec<u8>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn id(&self) -> &Hash {
        &self.header.transaction_id
    }

    /// Base58 of the ID; the key used by every pool.
    pub fn id_base58(&self) -> String {
        to_base58(&self.header.transaction_id)
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn prev_id(&self) -> &Hash {
        &self.header.prev_transaction_id
    }

    pub fn requester(&self) -> &PublicKey {
        &self.header.requester_public_key
    }

    pub fn requestee(&self) -> &PublicKey {
        &self.header.requestee_public_key
    }

    /// Self-to-self and pointing at itself.
    pub fn is_genesis(&self) -> bool {
        self.header.requester_public_key == self.header.requestee_public_key
            && self.header.prev_transaction_id == self.header.transaction_id
    }

    pub fn is_requester_signed(&self) -> bool {
        !self.header.requester_signature.is_empty()
    }

    pub fn is_confirmed(&self) -> bool {
        self.is_requester_signed() && !self.header.requestee_signature.is_empty()
    }

    /// Whether `key` is one of the two parties.
    pub fn involves(&self, key: &PublicKey) -> bool {
        self.requester() == key || self.requestee() == key
    }

    /// Accepted count of the first output, 0 when there is none.
    pub fn accepted(&self) -> u64 {
        self.outputs.first().map_or(0, |o| o.accepted)
    }

    /// Rejected count of the first output, 0 when there is none.
    pub fn rejected(&self) -> u64 {
        self.outputs.first().map_or(0, |o| o.rejected)
    }

    /// The digest both parties sign: SHA-256 over the header with empty
    /// signature slots, the meta payload and the encoded outputs.
    pub fn signing_digest(&self) -> Hash {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.header.encode_into(&mut buf, false);
        buf.extend_from_slice(&self.meta);
        for o in &self.outputs {
            o.encode_into(&mut buf);
        }
        sha256(&buf)
    }

    pub fn encoded_len(&self) -> usize {
        TRANSACTION_HEADER_LENGTH + self.meta.len() + self.outputs.len() * TX_OUTPUT_LENGTH
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        self.header.encode_into(buf, true);
        buf.put_slice(&self.meta);
        for o in &self.outputs {
            o.encode_into(buf);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes one transaction that must occupy all of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < TRANSACTION_HEADER_LENGTH {
            return Err(CodecError::InvalidLength {
                expected: TRANSACTION_HEADER_LENGTH,
                actual: data.len(),
            });
        }
        let mut rd = data;
        let header = TransactionHeader::read(&mut rd)?;

        let meta_len = checked_span(header.meta_length, 1, 0)?;
        let expected = checked_span(
            header.output_length,
            TX_OUTPUT_LENGTH,
            TRANSACTION_HEADER_LENGTH + meta_len,
        )?;
        if data.len() != expected {
            return Err(CodecError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }

        let meta = take_bytes(&mut rd, meta_len)?;
        let mut outputs = Vec::with_capacity(header.output_length as usize);
        for _ in 0..header.output_length {
            let chunk = take_bytes(&mut rd, TX_OUTPUT_LENGTH)?;
            outputs.push(TxOutput::decode(&chunk)?);
        }
        ensure_exhausted(&rd, expected)?;

        Ok(Self {
            header,
            meta,
            outputs,
        })
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id_base58())
            .field("timestamp", &self.header.timestamp)
            .field("requester", &self.header.requester_public_key)
            .field("requestee", &self.header.requestee_public_key)
            .field("confirmed", &self.is_confirmed())
            .field("meta_len", &self.meta.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// Pool ordering: ascending timestamp, then ID so that equal timestamps
/// still sort deterministically.
pub fn by_timestamp(a: &Transaction, b: &Transaction) -> Ordering {
    a.header
        .timestamp
        .cmp(&b.header.timestamp)
        .then_with(|| a.header.transaction_id.cmp(&b.header.transaction_id))
}

// ---------------------------------------------------------------------------
// Transaction lists
// ---------------------------------------------------------------------------

/// `count[8] | (len[8] | transaction)*`, the payload of `SyncTransactions`.
pub fn encode_transactions(txs: &[Transaction]) -> Vec<u8> {
    let total: usize = txs.iter().map(|t| U64_LENGTH + t.encoded_len()).sum();
    let mut buf = Vec::with_capacity(U64_LENGTH + total);
    put_len(&mut buf, txs.len());
    for tx in txs {
        put_len(&mut buf, tx.encoded_len());
        tx.encode_into(&mut buf);
    }
    buf
}

/// Inverse of [`encode_transactions`]. Trailing bytes are an error.
pub fn decode_transactions(data: &[u8]) -> Result<Vec<Transaction>, CodecError> {
    let mut rd = data;
    let count = take_u64_le(&mut rd)?;
    // Every entry costs at least a length field and a header; do not trust
    // `count` for the allocation.
    let bound = rd.len() / (U64_LENGTH + TRANSACTION_HEADER_LENGTH);
    let mut out = Vec::with_capacity((count as usize).min(bound));
    for _ in 0..count {
        let len = take_len(&mut rd)?;
        let body = take_bytes(&mut rd, len)?;
        out.push(Transaction::decode(&body)?);
    }
    ensure_exhausted(&rd, data.len() - rd.len())?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
