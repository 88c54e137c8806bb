//! Property tests for the binary and JSON codecs.
//!
//! Values are random and not validly signed: the codecs must carry any
//! bytes, verification is a separate concern. Signature slots are generated
//! with leading zero bytes, which the decoder strips.

use proptest::prelude::*;

use microchain_protocol::codec::strip_leading;
use microchain_protocol::crypto::PublicKey;
use microchain_protocol::network::{Message, PingData, RemoteNode, SyncNodesData};
use microchain_protocol::storage::{Block, BlockHeader};
use microchain_protocol::transaction::{
    decode_transactions, encode_transactions, Transaction, TransactionHeader, TxOutput,
};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_key() -> impl Strategy<Value = PublicKey> {
    prop::collection::vec(any::<u8>(), 64).prop_map(|b| PublicKey::try_from_slice(&b).unwrap())
}

fn arb_hash() -> impl Strategy<Value = [u8; 32]> {
    prop::array::uniform32(any::<u8>())
}

/// Up to 64 bytes, often starting with zeros.
fn arb_signature() -> impl Strategy<Value = Vec<u8>> {
    (0usize..=8, prop::collection::vec(any::<u8>(), 0..=56)).prop_map(|(zeros, tail)| {
        let mut sig = vec![0u8; zeros];
        sig.extend(tail);
        sig
    })
}

fn arb_output() -> impl Strategy<Value = TxOutput> {
    (any::<u64>(), any::<u64>(), arb_hash()).prop_map(|(accepted, rejected, hash)| TxOutput {
        accepted,
        rejected,
        next_public_key_hash: hash,
    })
}

fn arb_transaction() -> impl Strategy<Value = Transaction> {
    (
        (arb_hash(), any::<u32>(), arb_hash()),
        (arb_key(), arb_signature(), arb_key(), arb_signature()),
        prop::collection::vec(any::<u8>(), 0..64),
        prop::collection::vec(arb_output(), 0..4),
    )
        .prop_map(
            |((id, timestamp, prev), (req, req_sig, ree, ree_sig), meta, outputs)| Transaction {
                header: TransactionHeader {
                    transaction_id: id,
                    timestamp,
                    prev_transaction_id: prev,
                    requester_public_key: req,
                    requester_signature: req_sig,
                    requestee_public_key: ree,
                    requestee_signature: ree_sig,
                    meta_length: meta.len() as u64,
                    output_length: outputs.len() as u64,
                },
                meta,
                outputs,
            },
        )
}

fn arb_block() -> impl Strategy<Value = Block> {
    (
        arb_key(),
        arb_hash(),
        arb_hash(),
        any::<u32>(),
        arb_signature(),
        prop::collection::vec(arb_transaction(), 0..4),
    )
        .prop_map(
            |(generator, prev, merkle_root, timestamp, signature, transactions)| Block {
                header: BlockHeader {
                    generator_id: generator,
                    prev_block_id: prev,
                    merkle_root,
                    timestamp,
                    transactions_length: transactions.len() as u64,
                },
                signature,
                transactions,
            },
        )
}

fn arb_remote_node() -> impl Strategy<Value = RemoteNode> {
    (arb_key(), "[a-z0-9.:]{0,24}", any::<u64>()).prop_map(|(public_key, address, last_seen)| {
        RemoteNode {
            public_key,
            address,
            last_seen,
        }
    })
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (arb_key(), "[a-z0-9.:]{0,24}")
            .prop_map(|(public_key, address)| Message::Ping(PingData { public_key, address })),
        prop::collection::vec(arb_remote_node(), 0..4)
            .prop_map(|nodes| Message::SyncNodes(SyncNodesData { nodes })),
        arb_transaction().prop_map(|tx| Message::SendTransaction(canonical(tx))),
        arb_transaction().prop_map(|tx| Message::PendingTransaction(canonical(tx))),
        prop::collection::vec(arb_transaction(), 0..4)
            .prop_map(|txs| Message::SyncTransactions(txs.into_iter().map(canonical).collect())),
    ]
}

/// What the decoder hands back: signatures without their leading zeros.
fn canonical(mut tx: Transaction) -> Transaction {
    tx.header.requester_signature = strip_leading(&tx.header.requester_signature, 0).to_vec();
    tx.header.requestee_signature = strip_leading(&tx.header.requestee_signature, 0).to_vec();
    tx
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    /// Header encode/decode keeps every field; signature padding is ignored.
    #[test]
    fn header_roundtrip(tx in arb_transaction()) {
        let bytes = tx.header.encode();
        prop_assert_eq!(bytes.len(), 340);
        let decoded = TransactionHeader::decode(&bytes).unwrap();
        prop_assert!(decoded.equal_with(&tx.header));
        prop_assert_eq!(decoded, canonical(tx).header);
    }

    #[test]
    fn transaction_roundtrip(tx in arb_transaction()) {
        let bytes = tx.encode();
        prop_assert_eq!(bytes.len(), tx.encoded_len());
        prop_assert_eq!(Transaction::decode(&bytes).unwrap(), canonical(tx));
    }

    /// Any truncation of an encoded transaction is refused.
    #[test]
    fn truncated_transaction_is_refused(tx in arb_transaction(), cut in 1usize..64) {
        let bytes = tx.encode();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(Transaction::decode(&bytes[..keep]).is_err());
    }

    #[test]
    fn transaction_list_roundtrip(txs in prop::collection::vec(arb_transaction(), 0..6)) {
        let bytes = encode_transactions(&txs);
        let expected: Vec<Transaction> = txs.into_iter().map(canonical).collect();
        prop_assert_eq!(decode_transactions(&bytes).unwrap(), expected);
    }

    #[test]
    fn block_roundtrip(block in arb_block()) {
        let bytes = block.encode();
        let decoded = Block::decode(&bytes).unwrap();

        let expected = Block {
            header: block.header.clone(),
            signature: strip_leading(&block.signature, 0).to_vec(),
            transactions: block.transactions.into_iter().map(canonical).collect(),
        };
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn message_roundtrip(msg in arb_message()) {
        let bytes = msg.encode().unwrap();
        prop_assert_eq!(bytes[0], msg.message_type() as u8);
        prop_assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }
}
