//! Transaction signing for both parties of the handshake.
//!
//! Requester and requestee sign the same digest,
//! [`Transaction::signing_digest`], which covers the header with empty
//! signature slots, the meta payload and the outputs. The requester signs
//! first (the transaction becomes *pending*), the requestee counter-signs
//! (the transaction becomes *confirmed*). Neither signature covers the
//! other, so the order is a protocol rule rather than a cryptographic one.
//!
//! Each function checks that the keypair actually owns the role it is
//! signing for. A node that signs in the wrong slot would produce a
//! transaction nobody else can verify, so we fail loudly instead.

use super::builder::TransactionBuilder;
use super::types::{Transaction, TxOutput};
use super::verification::TransactionError;
use crate::codec::strip_leading;
use crate::crypto::KeyPair;

/// Adds the requester's signature. The transaction is now pending.
pub fn sign_as_requester(tx: &mut Transaction, keypair: &KeyPair) -> Result<(), TransactionError> {
    if *tx.requester() != keypair.public_key() {
        return Err(TransactionError::KeyMismatch { role: "requester" });
    }
    let sig = keypair.sign(&tx.signing_digest())?;
    tx.header.requester_signature = strip_leading(sig.as_bytes(), 0).to_vec();
    Ok(())
}

/// Adds the requestee's counter-signature. The transaction is now confirmed.
pub fn sign_as_requestee(tx: &mut Transaction, keypair: &KeyPair) -> Result<(), TransactionError> {
    if *tx.requestee() != keypair.public_key() {
        return Err(TransactionError::KeyMismatch { role: "requestee" });
    }
    let sig = keypair.sign(&tx.signing_digest())?;
    tx.header.requestee_signature = strip_leading(sig.as_bytes(), 0).to_vec();
    Ok(())
}

/// Builds the self-to-self transaction that opens a node's chain.
///
/// It points at itself, opens the tally at one accepted and zero rejected,
/// and is signed in both slots by the same key.
///
/// # Example
///
/// ```
/// use microchain_protocol::crypto::KeyPair;
/// use microchain_protocol::transaction::{new_genesis_transaction, verify_transaction};
///
/// let kp = KeyPair::generate().unwrap();
/// let genesis = new_genesis_transaction(&kp, b"hello".to_vec()).unwrap();
/// assert!(genesis.is_genesis());
/// assert!(verify_transaction(&genesis).is_ok());
/// ```
pub fn new_genesis_transaction(
    keypair: &KeyPair,
    meta: Vec<u8>,
) -> Result<Transaction, TransactionError> {
    let pk = keypair.public_key();
    let mut tx = TransactionBuilder::new(pk, pk)
        .meta(meta)
        .output(TxOutput::new(1, 0, &pk))
        .build();
    sign_as_requester(&mut tx, keypair)?;
    sign_as_requestee(&mut tx, keypair)?;
    Ok(tx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::verification::{verify_requestee_signature, verify_requester_signature};

    #[test]
    fn requester_then_requestee() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let mut tx = TransactionBuilder::new(alice.public_key(), bob.public_key()).build();

        sign_as_requester(&mut tx, &alice).unwrap();
        assert!(tx.is_requester_signed());
        assert!(!tx.is_confirmed());
        verify_requester_signature(&tx).unwrap();

        sign_as_requestee(&mut tx, &bob).unwrap();
        assert!(tx.is_confirmed());
        verify_requestee_signature(&tx).unwrap();
        // The counter-signature does not disturb the first one.
        verify_requester_signature(&tx).unwrap();
    }

    #[test]
    fn wrong_role_is_refused() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let mut tx = TransactionBuilder::new(alice.public_key(), bob.public_key()).build();

        assert!(matches!(
            sign_as_requester(&mut tx, &bob),
            Err(TransactionError::KeyMismatch { role: "requester" })
        ));
        assert!(matches!(
            sign_as_requestee(&mut tx, &alice),
            Err(TransactionError::KeyMismatch { role: "requestee" })
        ));
        assert!(!tx.is_requester_signed());
    }

    #[test]
    fn genesis_shape() {
        let kp = KeyPair::generate().unwrap();
        let g = new_genesis_transaction(&kp, b"hello".to_vec()).unwrap();
        assert!(g.is_genesis());
        assert!(g.is_confirmed());
        assert_eq!(g.prev_id(), g.id());
        assert_eq!(g.accepted(), 1);
        assert_eq!(g.rejected(), 0);
        assert_eq!(g.outputs[0].next_public_key_hash, kp.public_key().digest());
        assert_eq!(g.meta, b"hello");
    }

    #[test]
    fn stored_signatures_have_no_leading_zero() {
        let kp = KeyPair::generate().unwrap();
        for i in 0..16u8 {
            let g = new_genesis_transaction(&kp, vec![i]).unwrap();
            assert_ne!(g.header.requester_signature.first(), Some(&0));
            assert_ne!(g.header.requestee_signature.first(), Some(&0));
        }
    }
}
