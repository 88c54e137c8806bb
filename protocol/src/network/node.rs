//! # Node
//!
//! The `Node` is the top-level runtime entity of a microchain participant.
//! It owns the identity, the routing table, both transaction pools, the
//! local chain tip and the sealed blockchain, and it exposes every
//! operation the dispatcher, the gossip loops and the admin API need.
//!
//! ```text
//! Node::start() ─► accept loop ─► dispatch ─► handlers ─┐
//!              ├─► liveness sweep ─────────────────────┤─► shared state
//!              ├─► routing-table gossip ───────────────┤
//!              └─► pool gossip ────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! Each piece of shared state has its own `parking_lot::RwLock`: identity,
//! routing table, transaction pool, pending pool, chain state and
//! blockchain. No guard is ever held across an `.await`. The only nesting
//! is identity inside blockchain while a block is sealed.
//!
//! ## Chain tip
//!
//! A node's chain starts with its genesis transaction
//! ([`set_genesis_transaction`](Node::set_genesis_transaction), exactly
//! once). Every transaction it requests points at the current tip. The
//! requestee moves its tip when it confirms; the requester moves its tip
//! when the confirmed transaction comes back through the network.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::message::{unix_now, Message, PingData, RemoteNode, SyncNodesData};
use super::pool::{RoutingTable, TransactionPool};
use super::transport::{self, NetworkError};
use super::{dispatch, gossip};
use crate::codec::CodecError;
use crate::config::{NodeConfig, ACK_REPLY, PACKET_CHANNEL_CAPACITY, PING_REPLY};
use crate::crypto::{to_base58, Hash, KeyError, KeyPair, PublicKey};
use crate::storage::{Block, BlockError, Blockchain};
use crate::transaction::{
    self, now_secs, sign_as_requestee, sign_as_requester, Transaction, TransactionBuilder,
    TransactionError, TxOutput,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("genesis transaction is already set")]
    GenesisAlreadySet,

    #[error("transaction {0} is not a genesis transaction")]
    NotGenesis(String),

    #[error("no chain tip yet, set a genesis transaction first")]
    MissingChainTip,

    #[error("unknown peer {0}")]
    UnknownPeer(String),

    #[error("pending transaction {0} not found")]
    PendingNotFound(String),

    #[error("transaction pool is empty")]
    EmptyPool,

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Block(#[from] BlockError),
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of a fan-out to every known peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Point-in-time summary for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub public_key: String,
    pub address: String,
    pub peers: usize,
    pub transactions: usize,
    pub pendings: usize,
    pub blocks: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub chain_tip: Option<String>,
}

#[derive(Debug, Default)]
struct ChainState {
    prev_transaction: Option<Transaction>,
    accepted: u64,
    rejected: u64,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub struct Node {
    identity: RwLock<KeyPair>,
    address: String,
    config: NodeConfig,
    span: Span,
    routing_table: RoutingTable,
    transaction_pool: TransactionPool,
    pending_pool: TransactionPool,
    chain_state: RwLock<ChainState>,
    blockchain: RwLock<Blockchain>,
}

impl Node {
    /// Builds a node without any network activity. Its advertised address
    /// comes from `config`.
    pub fn new(keypair: KeyPair, config: NodeConfig) -> Self {
        let public_key = keypair.public_key().to_base58();
        let address = config.advertised().to_string();
        let span = info_span!("node", pk = %short(&public_key), addr = %address);
        span.in_scope(|| info!(public_key = %public_key, "node created"));

        Self {
            identity: RwLock::new(keypair),
            address,
            config,
            span,
            routing_table: RoutingTable::new(),
            transaction_pool: TransactionPool::new(),
            pending_pool: TransactionPool::new(),
            chain_state: RwLock::new(ChainState::default()),
            blockchain: RwLock::new(Blockchain::new()),
        }
    }

    /// Binds the listener, spawns the dispatcher and the gossip loops, and
    /// joins every bootstrap peer.
    ///
    /// When `advertised_address` is empty the bound socket address is
    /// advertised, which makes `127.0.0.1:0` usable in tests.
    pub async fn start(keypair: KeyPair, mut config: NodeConfig) -> Result<NodeHandle, NodeError> {
        let listener = transport::bind(&config.listen_address).await?;
        if config.advertised_address.is_empty() {
            let local = listener.local_addr().map_err(NetworkError::from)?;
            config.advertised_address = local.to_string();
        }

        let node = Arc::new(Node::new(keypair, config));
        let span = node.span.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);

        let mut tasks = vec![
            tokio::spawn(
                transport::accept_loop(
                    listener,
                    packet_tx,
                    node.config.io_timeout,
                    node.config.max_frame_length,
                    shutdown_rx.clone(),
                )
                .instrument(span.clone()),
            ),
            tokio::spawn(
                dispatch::run(Arc::clone(&node), packet_rx, shutdown_rx.clone())
                    .instrument(span.clone()),
            ),
        ];
        tasks.extend(gossip::spawn(Arc::clone(&node), shutdown_rx));

        for peer in node.config.bootstrap_peers.clone() {
            match node.join(&peer).instrument(span.clone()).await {
                Ok(()) => span.in_scope(|| info!(peer = %peer, "joined bootstrap peer")),
                Err(e) => span.in_scope(|| warn!(peer = %peer, error = %e, "bootstrap join failed")),
            }
        }

        span.in_scope(|| info!(address = %node.address, "node started"));
        Ok(NodeHandle {
            node,
            shutdown: shutdown_tx,
            tasks,
        })
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn public_key(&self) -> PublicKey {
        self.identity.read().public_key()
    }

    pub fn public_key_string(&self) -> String {
        self.public_key().to_base58()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Span every task of this node runs in.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Replaces the signing key. Returns the previous public key.
    ///
    /// The chain tip is kept, but transactions already pending elsewhere
    /// still name the old key and can no longer be matched to this node.
    pub fn rotate_identity(&self, keypair: KeyPair) -> PublicKey {
        let mut identity = self.identity.write();
        let old = identity.public_key();
        *identity = keypair;
        let new = identity.public_key();
        drop(identity);
        self.span.in_scope(|| info!(old = %old, new = %new, "identity rotated"));
        old
    }

    pub fn status(&self) -> NodeStatus {
        let (accepted, rejected, chain_tip) = {
            let state = self.chain_state.read();
            (
                state.accepted,
                state.rejected,
                state.prev_transaction.as_ref().map(Transaction::id_base58),
            )
        };
        NodeStatus {
            public_key: self.public_key_string(),
            address: self.address.clone(),
            peers: self.routing_table.len(),
            transactions: self.transaction_pool.len(),
            pendings: self.pending_pool.len(),
            blocks: self.blockchain.read().height(),
            accepted,
            rejected,
            chain_tip,
        }
    }

    // -----------------------------------------------------------------------
    // Routing table
    // -----------------------------------------------------------------------

    pub fn get_nodes_of_routing_table(&self) -> Vec<RemoteNode> {
        self.routing_table.list()
    }

    /// Insert-if-absent. Our own key is never stored.
    pub fn check_and_add_node_to_routing_table(&self, node: RemoteNode) -> bool {
        if node.public_key == self.public_key() {
            return false;
        }
        let key = node.key();
        let added = self.routing_table.check_and_add(node);
        if added {
            self.span.in_scope(|| debug!(peer = %key, "peer added"));
        }
        added
    }

    pub fn update_node_for_given_public_key(&self, node: RemoteNode) {
        self.routing_table.update_for_key(node);
    }

    pub fn remove_node_by_public_key(&self, key: &str) -> Option<RemoteNode> {
        self.routing_table.remove(key)
    }

    pub fn get_node_by_public_key(&self, key: &str) -> Option<RemoteNode> {
        self.routing_table.get(key)
    }

    /// Refreshes `last_seen` of a known peer.
    pub fn touch_node(&self, key: &str) -> bool {
        self.routing_table.touch(key, unix_now())
    }

    // -----------------------------------------------------------------------
    // Transaction pool
    // -----------------------------------------------------------------------

    pub fn get_transactions_of_pool(&self) -> Vec<Transaction> {
        self.transaction_pool.list()
    }

    /// Idempotent insert without verification. Use
    /// [`accept_confirmed_transaction`](Self::accept_confirmed_transaction)
    /// for anything that came off the wire.
    pub fn check_and_add_transaction_to_pool(&self, tx: Transaction) -> bool {
        self.transaction_pool.check_and_add(tx)
    }

    pub fn get_transaction_by_id_from_pool(&self, id: &str) -> Option<Transaction> {
        self.transaction_pool.get(id)
    }

    pub fn remove_transaction_by_id_from_pool(&self, id: &str) -> Option<Transaction> {
        self.transaction_pool.remove_by_id(id)
    }

    /// Verifies a confirmed transaction and stores it.
    ///
    /// Returns `Ok(false)` for transactions we already hold, in the pool or
    /// in a sealed block. Those are not verified again. When this node requested the transaction and it
    /// extends our tip, the tip moves forward.
    pub fn accept_confirmed_transaction(&self, tx: Transaction) -> Result<bool, NodeError> {
        if self.transaction_pool.contains(&tx.id_base58())
            || self.get_transaction_by_id_from_chain(tx.id()).is_some()
        {
            return Ok(false);
        }
        self.verify_transaction(&tx)?;
        if !self.transaction_pool.check_and_add(tx.clone()) {
            return Ok(false);
        }

        let me = self.public_key();
        if *tx.requester() == me && !tx.is_genesis() {
            let mut state = self.chain_state.write();
            let extends = state
                .prev_transaction
                .as_ref()
                .is_some_and(|tip| tip.id() == tx.prev_id());
            if extends {
                state.prev_transaction = Some(tx.clone());
                state.accepted += 1;
                drop(state);
                self.span
                    .in_scope(|| info!(tx = %tx.id_base58(), "chain tip advanced by requestee"));
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Pending pool
    // -----------------------------------------------------------------------

    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.pending_pool.list()
    }

    pub fn check_and_add_pending_transaction(&self, tx: Transaction) -> bool {
        self.pending_pool.check_and_add(tx)
    }

    pub fn get_pending_transaction_by_id(&self, id: &str) -> Option<Transaction> {
        self.pending_pool.get(id)
    }

    pub fn remove_pending_transaction_by_id(&self, id: &str) -> Option<Transaction> {
        self.pending_pool.remove_by_id(id)
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<(), TransactionError> {
        transaction::verify_transaction(tx)
    }

    /// Checks a pending transaction addressed to this node.
    pub fn verify_pending_transaction(&self, tx: &Transaction) -> Result<(), TransactionError> {
        transaction::verify_pending_transaction(tx, &self.public_key())
    }

    // -----------------------------------------------------------------------
    // Chain tip
    // -----------------------------------------------------------------------

    pub fn new_genesis_transaction(&self, meta: Vec<u8>) -> Result<Transaction, NodeError> {
        let identity = self.identity.read();
        Ok(transaction::new_genesis_transaction(&identity, meta)?)
    }

    /// Installs our genesis as chain tip and stores it in the pool.
    /// Succeeds once per node.
    pub fn set_genesis_transaction(&self, tx: Transaction) -> Result<(), NodeError> {
        if !tx.is_genesis() || *tx.requester() != self.public_key() {
            return Err(NodeError::NotGenesis(tx.id_base58()));
        }
        self.verify_transaction(&tx)?;

        {
            let mut state = self.chain_state.write();
            if state.prev_transaction.is_some() {
                return Err(NodeError::GenesisAlreadySet);
            }
            state.prev_transaction = Some(tx.clone());
            state.accepted = tx.accepted();
            state.rejected = tx.rejected();
        }

        let id = tx.id_base58();
        self.transaction_pool.check_and_add(tx);
        self.span.in_scope(|| info!(tx = %id, "genesis transaction set"));
        Ok(())
    }

    /// Unconditionally moves the chain tip.
    pub fn update_prev_transaction(&self, tx: Transaction) {
        self.chain_state.write().prev_transaction = Some(tx);
    }

    pub fn prev_transaction(&self) -> Option<Transaction> {
        self.chain_state.read().prev_transaction.clone()
    }

    // -----------------------------------------------------------------------
    // Pending flow
    // -----------------------------------------------------------------------

    /// Builds a requester-signed transaction to `requestee` on top of the
    /// chain tip, carrying our current tally.
    pub fn new_pending_transaction(
        &self,
        requestee: PublicKey,
        meta: Vec<u8>,
    ) -> Result<Transaction, NodeError> {
        let (prev_id, accepted, rejected) = {
            let state = self.chain_state.read();
            let tip = state
                .prev_transaction
                .as_ref()
                .ok_or(NodeError::MissingChainTip)?;
            (*tip.id(), state.accepted, state.rejected)
        };

        let identity = self.identity.read();
        let me = identity.public_key();
        let mut tx = TransactionBuilder::new(me, requestee)
            .prev_transaction_id(prev_id)
            .timestamp(now_secs())
            .meta(meta)
            .output(TxOutput::new(accepted, rejected, &me))
            .build();
        sign_as_requester(&mut tx, &identity)?;
        Ok(tx)
    }

    /// Counter-signs `tx` as requestee.
    pub fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), NodeError> {
        let identity = self.identity.read();
        sign_as_requestee(tx, &identity)?;
        Ok(())
    }

    /// Counter-signs a pending transaction, stores it, moves our tip onto
    /// it and broadcasts it to every peer.
    ///
    /// The entry is taken out of the pending pool before anything else, so
    /// a concurrent confirm or reject of the same ID finds nothing. It goes
    /// back only if signing or verification fails.
    pub async fn confirm_pending_transaction(
        &self,
        id: &str,
    ) -> Result<(Transaction, BroadcastReport), NodeError> {
        let pending = self
            .remove_pending_transaction_by_id(id)
            .ok_or_else(|| NodeError::PendingNotFound(id.to_string()))?;

        let mut tx = pending.clone();
        let signed = self
            .sign_transaction(&mut tx)
            .and_then(|()| self.verify_transaction(&tx).map_err(NodeError::from));
        if let Err(e) = signed {
            self.pending_pool.check_and_add(pending);
            return Err(e);
        }

        self.transaction_pool.check_and_add(tx.clone());
        {
            let mut state = self.chain_state.write();
            state.prev_transaction = Some(tx.clone());
            state.accepted += 1;
        }
        self.span.in_scope(|| info!(tx = %id, "pending transaction confirmed"));

        let report = self.broadcast(&Message::SendTransaction(tx.clone())).await?;
        Ok((tx, report))
    }

    /// Drops a pending transaction and counts it as rejected.
    pub fn reject_pending_transaction(&self, id: &str) -> Result<Transaction, NodeError> {
        let tx = self
            .remove_pending_transaction_by_id(id)
            .ok_or_else(|| NodeError::PendingNotFound(id.to_string()))?;
        self.chain_state.write().rejected += 1;
        self.span.in_scope(|| info!(tx = %id, "pending transaction rejected"));
        Ok(tx)
    }

    /// Creates a pending transaction for the peer `peer_key` and sends it.
    pub async fn send_pending_transaction(
        &self,
        peer_key: &str,
        meta: Vec<u8>,
    ) -> Result<Transaction, NodeError> {
        let peer = self
            .get_node_by_public_key(peer_key)
            .ok_or_else(|| NodeError::UnknownPeer(peer_key.to_string()))?;
        let tx = self.new_pending_transaction(peer.public_key, meta)?;

        let reply = self
            .send(&peer.address, &Message::PendingTransaction(tx.clone()))
            .await?;
        if reply != ACK_REPLY {
            return Err(NetworkError::UnexpectedReply(peer.address).into());
        }
        self.span.in_scope(|| info!(tx = %tx.id_base58(), peer = %peer_key, "pending transaction sent"));
        Ok(tx)
    }

    /// Creates our genesis, installs it and broadcasts it.
    pub async fn broadcast_genesis_transaction(
        &self,
        meta: Vec<u8>,
    ) -> Result<(Transaction, BroadcastReport), NodeError> {
        let genesis = self.new_genesis_transaction(meta)?;
        self.set_genesis_transaction(genesis.clone())?;
        let report = self
            .broadcast(&Message::SendTransaction(genesis.clone()))
            .await?;
        Ok((genesis, report))
    }

    // -----------------------------------------------------------------------
    // Networking
    // -----------------------------------------------------------------------

    /// Sends one message and returns the raw reply.
    pub async fn send(&self, addr: &str, msg: &Message) -> Result<Vec<u8>, NodeError> {
        let body = msg.encode()?;
        Ok(self.send_raw(addr, &body).await?)
    }

    async fn send_raw(&self, addr: &str, body: &[u8]) -> Result<Vec<u8>, NetworkError> {
        transport::send(
            addr,
            body,
            self.config.io_timeout,
            self.config.max_frame_length,
        )
        .await
    }

    /// Sends `msg` to every peer concurrently. One unreachable peer never
    /// stops delivery to the others.
    pub async fn broadcast(&self, msg: &Message) -> Result<BroadcastReport, NodeError> {
        let body = msg.encode()?;
        let peers = self.get_nodes_of_routing_table();
        let results = join_all(peers.iter().map(|p| self.send_raw(&p.address, &body))).await;

        let mut report = BroadcastReport::default();
        for (peer, res) in peers.iter().zip(results) {
            match res {
                Ok(_) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(peer = %peer.address, error = %e, kind = %msg.message_type(), "broadcast send failed");
                }
            }
        }
        Ok(report)
    }

    /// Pings `addr` with our identity.
    pub async fn ping(&self, addr: &str) -> Result<(), NodeError> {
        let ping = Message::Ping(PingData {
            public_key: self.public_key(),
            address: self.address.clone(),
        });
        let reply = self.send(addr, &ping).await?;
        if reply != PING_REPLY {
            return Err(NetworkError::UnexpectedReply(addr.to_string()).into());
        }
        Ok(())
    }

    /// Announces ourselves to `addr` and hands it our routing table.
    pub async fn join(&self, addr: &str) -> Result<(), NodeError> {
        self.ping(addr).await?;
        let sync = Message::SyncNodes(SyncNodesData {
            nodes: self.routing_snapshot_with_self(),
        });
        self.send(addr, &sync).await?;
        Ok(())
    }

    /// Routing table plus ourselves, as gossiped in `SyncNodes`.
    pub fn routing_snapshot_with_self(&self) -> Vec<RemoteNode> {
        let mut nodes = self.get_nodes_of_routing_table();
        nodes.push(RemoteNode::new(self.public_key(), self.address.clone()));
        nodes
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Seals the whole transaction pool into a block on top of our chain.
    ///
    /// Every drained transaction is verified first. Ones that fail are
    /// dropped from the pool for good, so one bad entry cannot block every
    /// later seal. The pool is emptied on success and the verified
    /// transactions are restored on failure.
    pub fn seal_block(&self) -> Result<Block, NodeError> {
        let (txs, invalid): (Vec<_>, Vec<_>) = self
            .transaction_pool
            .drain_sorted()
            .into_iter()
            .partition(|tx| self.verify_transaction(tx).is_ok());
        for tx in &invalid {
            warn!(tx = %tx.id_base58(), "dropping unverifiable transaction from the pool");
        }
        if txs.is_empty() {
            return Err(NodeError::EmptyPool);
        }

        let sealed = {
            let mut chain = self.blockchain.write();
            let identity = self.identity.read();
            Block::seal(&identity, chain.tip_id(), txs.clone(), now_secs())
                .map_err(NodeError::from)
                .and_then(|block| {
                    chain.append(block.clone())?;
                    Ok(block)
                })
        };

        match sealed {
            Ok(block) => {
                self.span.in_scope(|| {
                    info!(
                        block = %block.id_base58(),
                        txs = block.transactions.len(),
                        "block sealed"
                    )
                });
                Ok(block)
            }
            Err(e) => {
                for tx in txs {
                    self.transaction_pool.check_and_add(tx);
                }
                warn!(error = %e, "block sealing failed, pool restored");
                Err(e)
            }
        }
    }

    pub fn get_blocks(&self) -> Vec<Block> {
        self.blockchain.read().blocks().to_vec()
    }

    pub fn get_transaction_by_id_from_chain(&self, id: &Hash) -> Option<Transaction> {
        self.blockchain.read().transaction_by_id(id).cloned()
    }

    /// The transaction `tx` points back to, from the sealed chain or the
    /// pool. `None` for genesis transactions.
    pub fn prev_transaction_of(&self, tx: &Transaction) -> Option<Transaction> {
        if tx.is_genesis() {
            return None;
        }
        self.get_transaction_by_id_from_chain(tx.prev_id())
            .or_else(|| self.get_transaction_by_id_from_pool(&to_base58(tx.prev_id())))
    }
}

/// First eight characters of a Base58 key, for span fields.
fn short(key: &str) -> &str {
    key.get(..8).unwrap_or(key)
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

/// A running node and the tasks that drive it.
pub struct NodeHandle {
    node: Arc<Node>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// A receiver that flips when [`shutdown`](Self::shutdown) is called.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stops the listener and every loop, then waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "node task ended abnormally");
            }
        }
        self.node.span.in_scope(|| info!("node stopped"));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
