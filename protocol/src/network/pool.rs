//! Shared node state: the routing table and the transaction pools.
//!
//! Each structure owns its own `parking_lot::RwLock`, so routing traffic
//! never waits on pool traffic. Every read that hands data out copies it
//! under the read guard; callers never see the live map and never hold a
//! guard across an `.await`.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::message::RemoteNode;
use crate::transaction::{by_timestamp, Transaction};

// ---------------------------------------------------------------------------
// Routing Table
// ---------------------------------------------------------------------------

/// Known peers keyed by Base58 public key.
#[derive(Debug, Default)]
pub struct RoutingTable {
    nodes: RwLock<HashMap<String, RemoteNode>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `node` only when its key is unknown. First writer wins, so
    /// gossiped copies never clobber what we learned first-hand.
    pub fn check_and_add(&self, node: RemoteNode) -> bool {
        let mut nodes = self.nodes.write();
        let key = node.key();
        if nodes.contains_key(&key) {
            return false;
        }
        nodes.insert(key, node);
        true
    }

    /// Unconditional overwrite.
    pub fn update_for_key(&self, node: RemoteNode) {
        self.nodes.write().insert(node.key(), node);
    }

    /// Refreshes `last_seen` of a known peer. Returns `false` if unknown.
    pub fn touch(&self, key: &str, now: u64) -> bool {
        match self.nodes.write().get_mut(key) {
            Some(node) => {
                node.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<RemoteNode> {
        self.nodes.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<RemoteNode> {
        self.nodes.write().remove(key)
    }

    /// Snapshot ordered by key.
    pub fn list(&self) -> Vec<RemoteNode> {
        let mut out: Vec<RemoteNode> = self.nodes.read().values().cloned().collect();
        out.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Transaction Pool
// ---------------------------------------------------------------------------

/// Transactions keyed by Base58 transaction ID.
///
/// Used twice by a node: once for confirmed transactions and once for
/// pending transactions awaiting the local counter-signature.
#[derive(Debug, Default)]
pub struct TransactionPool {
    txs: RwLock<HashMap<String, Transaction>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert. IDs are content addresses, so a duplicate is
    /// always the same transaction and is ignored.
    pub fn check_and_add(&self, tx: Transaction) -> bool {
        let mut txs = self.txs.write();
        let key = tx.id_base58();
        if txs.contains_key(&key) {
            return false;
        }
        txs.insert(key, tx);
        true
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.txs.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.txs.read().contains_key(id)
    }

    pub fn remove_by_id(&self, id: &str) -> Option<Transaction> {
        self.txs.write().remove(id)
    }

    /// Snapshot sorted by ascending timestamp, ties broken by ID.
    pub fn list(&self) -> Vec<Transaction> {
        let mut out: Vec<Transaction> = self.txs.read().values().cloned().collect();
        out.sort_by(by_timestamp);
        out
    }

    /// Empties the pool, returning its contents in [`list`](Self::list)
    /// order.
    pub fn drain_sorted(&self) -> Vec<Transaction> {
        let mut out: Vec<Transaction> = self.txs.write().drain().map(|(_, tx)| tx).collect();
        out.sort_by(by_timestamp);
        out
    }

    pub fn len(&self) -> usize {
        self.txs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.read().is_empty()
    }
}
