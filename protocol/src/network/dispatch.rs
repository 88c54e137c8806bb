//! Inbound message dispatch.
//!
//! The accept loop hands every request frame to [`run`], which decodes it
//! and routes it with one exhaustive `match`. A handler either produces a
//! reply body, which is written back before the connection closes, or an
//! error, in which case the connection is closed without a reply.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn, Instrument};

use super::message::{Message, PingData, RemoteNode, SyncNodesData};
use super::node::{Node, NodeError};
use super::transport::Packet;
use crate::config::{ACK_REPLY, PING_REPLY};
use crate::transaction::Transaction;

/// Drains `packets` until shutdown. Each packet is handled on its own task.
pub async fn run(
    node: Arc<Node>,
    mut packets: mpsc::Receiver<Packet>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            packet = packets.recv() => {
                let Some(packet) = packet else { break };
                let node = Arc::clone(&node);
                let span = node.span().clone();
                tokio::spawn(handle_packet(node, packet).instrument(span));
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("dispatcher stopped");
}

async fn handle_packet(node: Arc<Node>, packet: Packet) {
    let peer = packet.peer;
    let msg = match Message::decode(&packet.body) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(peer = %peer, error = %e, "dropping malformed message");
            return;
        }
    };
    let kind = msg.message_type();
    trace!(peer = %peer, kind = %kind, "message received");

    match handle_message(&node, msg) {
        Ok(reply) => {
            if let Err(e) = packet.reply(reply, node.config().io_timeout).await {
                debug!(peer = %peer, kind = %kind, error = %e, "reply failed");
            }
        }
        Err(e) => debug!(peer = %peer, kind = %kind, error = %e, "message refused"),
    }
}

/// Applies one message to `node` and returns the reply body.
pub fn handle_message(node: &Node, msg: Message) -> Result<&'static [u8], NodeError> {
    match msg {
        Message::Ping(data) => Ok(on_ping(node, data)),
        Message::SyncNodes(data) => Ok(on_sync_nodes(node, data)),
        Message::SendTransaction(tx) => on_send_transaction(node, tx),
        Message::PendingTransaction(tx) => on_pending_transaction(node, tx),
        Message::SyncTransactions(txs) => Ok(on_sync_transactions(node, txs)),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn on_ping(node: &Node, data: PingData) -> &'static [u8] {
    let remote = RemoteNode::new(data.public_key, data.address);
    let key = remote.key();
    if !node.check_and_add_node_to_routing_table(remote) {
        node.touch_node(&key);
    }
    PING_REPLY
}

fn on_sync_nodes(node: &Node, data: SyncNodesData) -> &'static [u8] {
    let offered = data.nodes.len();
    let added = data
        .nodes
        .into_iter()
        .filter(|remote| node.check_and_add_node_to_routing_table(remote.clone()))
        .count();
    trace!(offered, added, "routing table merged");
    ACK_REPLY
}

fn on_send_transaction(node: &Node, tx: Transaction) -> Result<&'static [u8], NodeError> {
    let id = tx.id_base58();
    if node.accept_confirmed_transaction(tx)? {
        info!(tx = %id, "transaction received");
    }
    Ok(ACK_REPLY)
}

fn on_pending_transaction(node: &Node, tx: Transaction) -> Result<&'static [u8], NodeError> {
    node.verify_pending_transaction(&tx)?;
    let id = tx.id_base58();
    if node.check_and_add_pending_transaction(tx) {
        info!(tx = %id, "pending transaction awaiting confirmation");
    }
    Ok(ACK_REPLY)
}

fn on_sync_transactions(node: &Node, txs: Vec<Transaction>) -> &'static [u8] {
    let verify = node.config().verify_gossiped_transactions;
    for tx in txs {
        if verify {
            if let Err(e) = node.accept_confirmed_transaction(tx) {
                warn!(error = %e, "gossiped transaction refused");
            }
        } else {
            node.check_and_add_transaction_to_pool(tx);
        }
    }
    ACK_REPLY
}
