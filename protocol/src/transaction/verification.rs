//! Transaction verification: structural checks and cryptographic validation.
//!
//! Two entry points, one per lifecycle stage:
//!
//! - [`verify_transaction`] for confirmed (dual-signed) transactions, whether
//!   they arrive through `SendTransaction`, `SyncTransactions` or a block.
//! - [`verify_pending_transaction`] for half-signed transactions addressed to
//!   the local node.
//!
//! Checks run cheapest first: length fields and the ID hash before any
//! signature math.

use thiserror::Error;

use super::types::Transaction;
use crate::crypto::{to_base58, verify_signature, KeyError, PublicKey};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a transaction was refused.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction ID mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("header length fields disagree with the payload")]
    LengthMismatch,

    #[error("transaction is not signed by the requester")]
    MissingRequesterSignature,

    #[error("transaction is not signed by the requestee")]
    MissingRequesteeSignature,

    #[error("requester signature does not verify")]
    InvalidRequesterSignature,

    #[error("requestee signature does not verify")]
    InvalidRequesteeSignature,

    #[error("genesis output must be accepted=1 rejected=0, got accepted={accepted} rejected={rejected}")]
    InvalidGenesisOutput { accepted: u64, rejected: u64 },

    #[error("local node is not the requestee of this transaction")]
    NotRequestee,

    #[error("signing key does not belong to the transaction's {role}")]
    KeyMismatch { role: &'static str },

    #[error(transparent)]
    Key(#[from] KeyError),
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

/// The stored ID equals `SHA256(timestamp ‖ requester ‖ requestee)`.
pub fn verify_transaction_id(tx: &Transaction) -> Result<(), TransactionError> {
    let expected = super::TransactionHeader::compute_id(
        tx.header.timestamp,
        &tx.header.requester_public_key,
        &tx.header.requestee_public_key,
    );
    if expected != tx.header.transaction_id {
        return Err(TransactionError::IdMismatch {
            expected: to_base58(&expected),
            actual: tx.id_base58(),
        });
    }
    Ok(())
}

fn verify_lengths(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.header.meta_length != tx.meta.len() as u64
        || tx.header.output_length != tx.outputs.len() as u64
    {
        return Err(TransactionError::LengthMismatch);
    }
    Ok(())
}

pub fn verify_requester_signature(tx: &Transaction) -> Result<(), TransactionError> {
    if !tx.is_requester_signed() {
        return Err(TransactionError::MissingRequesterSignature);
    }
    if !verify_signature(
        tx.requester(),
        &tx.header.requester_signature,
        &tx.signing_digest(),
    ) {
        return Err(TransactionError::InvalidRequesterSignature);
    }
    Ok(())
}

pub fn verify_requestee_signature(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.header.requestee_signature.is_empty() {
        return Err(TransactionError::MissingRequesteeSignature);
    }
    if !verify_signature(
        tx.requestee(),
        &tx.header.requestee_signature,
        &tx.signing_digest(),
    ) {
        return Err(TransactionError::InvalidRequesteeSignature);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Full verification of a confirmed transaction.
///
/// Genesis transactions additionally have to open the tally at exactly one
/// accepted and zero rejected.
pub fn verify_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    verify_lengths(tx)?;
    verify_transaction_id(tx)?;

    if tx.is_genesis() && (tx.accepted() != 1 || tx.rejected() != 0) {
        return Err(TransactionError::InvalidGenesisOutput {
            accepted: tx.accepted(),
            rejected: tx.rejected(),
        });
    }

    verify_requester_signature(tx)?;
    verify_requestee_signature(tx)
}

/// Verification of a pending transaction on the requestee's side: it must
/// name `local` as requestee and carry a valid requester signature.
pub fn verify_pending_transaction(
    tx: &Transaction,
    local: &PublicKey,
) -> Result<(), TransactionError> {
    if tx.requestee() != local {
        return Err(TransactionError::NotRequestee);
    }
    verify_lengths(tx)?;
    verify_transaction_id(tx)?;
    verify_requester_signature(tx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
