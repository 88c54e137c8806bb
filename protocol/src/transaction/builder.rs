//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] assembles an unsigned [`Transaction`]: it
//! fills in the timestamp, derives the transaction ID from
//! `(timestamp, requester, requestee)` and keeps the header's length fields
//! in step with the meta payload and outputs.
//!
//! The builder does not sign; that happens in [`super::signing`]. Keeping
//! the two apart means construction is testable without key material.

use chrono::Utc;

use super::types::{Transaction, TransactionHeader, TxOutput};
use crate::crypto::{Hash, PublicKey};

/// Fluent builder for unsigned transactions.
///
/// ```
/// use microchain_protocol::crypto::KeyPair;
/// use microchain_protocol::transaction::{TransactionBuilder, TxOutput};
///
/// let alice = KeyPair::generate().unwrap();
/// let bob = KeyPair::generate().unwrap();
/// let tx = TransactionBuilder::new(alice.public_key(), bob.public_key())
///     .prev_transaction_id([7u8; 32])
///     .meta(b"lend you my ladder".to_vec())
///     .output(TxOutput::new(1, 0, &alice.public_key()))
///     .build();
///
/// assert_eq!(tx.header.meta_length, 18);
/// assert!(!tx.is_requester_signed());
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    requester: PublicKey,
    requestee: PublicKey,
    prev_transaction_id: Option<Hash>,
    timestamp: Option<u32>,
    meta: Vec<u8>,
    outputs: Vec<TxOutput>,
}

impl TransactionBuilder {
    pub fn new(requester: PublicKey, requestee: PublicKey) -> Self {
        Self {
            requester,
            requestee,
            prev_transaction_id: None,
            timestamp: None,
            meta: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// The requester's chain tip. Left unset, the transaction points at
    /// itself, which is only meaningful for genesis.
    pub fn prev_transaction_id(mut self, id: Hash) -> Self {
        self.prev_transaction_id = Some(id);
        self
    }

    /// Overrides the creation time (unix seconds). Defaults to now.
    pub fn timestamp(mut self, ts: u32) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn meta(mut self, meta: Vec<u8>) -> Self {
        self.meta = meta;
        self
    }

    pub fn output(mut self, output: TxOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn build(self) -> Transaction {
        let timestamp = self.timestamp.unwrap_or_else(now_secs);
        let transaction_id = TransactionHeader::compute_id(timestamp, &self.requester, &self.requestee);

        Transaction {
            header: TransactionHeader {
                transaction_id,
                timestamp,
                prev_transaction_id: self.prev_transaction_id.unwrap_or(transaction_id),
                requester_public_key: self.requester,
                requester_signature: Vec::new(),
                requestee_public_key: self.requestee,
                requestee_signature: Vec::new(),
                meta_length: self.meta.len() as u64,
                output_length: self.outputs.len() as u64,
            },
            meta: self.meta,
            outputs: self.outputs,
        }
    }
}

/// Current unix time in seconds, clamped into the 4-byte wire field.
pub fn now_secs() -> u32 {
    u32::try_from(Utc::now().timestamp().max(0)).unwrap_or(u32::MAX)
}
