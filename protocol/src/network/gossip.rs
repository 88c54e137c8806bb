//! # Periodic Gossip
//!
//! Three independent loops keep a node's view of the network fresh:
//!
//! | Loop | Period | Action |
//! |---|---|---|
//! | liveness sweep | `ping_period` | ping every peer, evict the long-silent ones |
//! | routing gossip | `broadcast_routing_table_period` | broadcast `SyncNodes` (table + self) |
//! | pool gossip | `broadcast_transactions_pool_period` | broadcast `SyncTransactions`, split to fit the frame limit |
//!
//! Delivery is best effort. A failed send is not retried within a cycle;
//! the next tick is the retry. Every loop exits as soon as the shutdown
//! channel flips, even in the middle of a sleep.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use super::message::{unix_now, Message, RemoteNode, SyncNodesData};
use super::node::{BroadcastReport, Node, NodeError};
use crate::config::U64_LENGTH;
use crate::transaction::Transaction;

/// Spawns the three loops on the current runtime.
pub fn spawn(node: Arc<Node>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let config = node.config().clone();
    let span = node.span().clone();

    let sweep_node = Arc::clone(&node);
    let routing_node = Arc::clone(&node);
    let pool_node = node;

    vec![
        tokio::spawn(
            every("liveness_sweep", config.ping_period, shutdown.clone(), move || {
                let node = Arc::clone(&sweep_node);
                async move {
                    sweep_routing_table(&node).await;
                }
            })
            .instrument(span.clone()),
        ),
        tokio::spawn(
            every(
                "routing_gossip",
                config.broadcast_routing_table_period,
                shutdown.clone(),
                move || {
                    let node = Arc::clone(&routing_node);
                    async move {
                        if let Err(e) = gossip_routing_table(&node).await {
                            debug!(error = %e, "routing gossip failed");
                        }
                    }
                },
            )
            .instrument(span.clone()),
        ),
        tokio::spawn(
            every(
                "pool_gossip",
                config.broadcast_transactions_pool_period,
                shutdown,
                move || {
                    let node = Arc::clone(&pool_node);
                    async move {
                        if let Err(e) = gossip_transaction_pool(&node).await {
                            debug!(error = %e, "pool gossip failed");
                        }
                    }
                },
            )
            .instrument(span),
        ),
    ]
}

async fn every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    debug!(task = name, period_secs = period.as_secs_f64(), "periodic task started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => tick().await,
            _ = shutdown.changed() => {
                debug!(task = name, "periodic task stopped");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

/// Pings every peer once. Answering peers get a fresh `last_seen`; silent
/// peers are evicted once `now - last_seen > invalid_period`.
///
/// Returns the number of evicted peers.
pub async fn sweep_routing_table(node: &Node) -> usize {
    let peers = node.get_nodes_of_routing_table();
    let results = join_all(peers.iter().map(|p| node.ping(&p.address))).await;

    let now = unix_now();
    let invalid_after = node.config().invalid_period.as_secs();
    let mut evicted = 0;

    for (peer, res) in peers.into_iter().zip(results) {
        match res {
            Ok(()) => node.update_node_for_given_public_key(RemoteNode {
                last_seen: now,
                ..peer
            }),
            Err(e) if now.saturating_sub(peer.last_seen) > invalid_after => {
                node.remove_node_by_public_key(&peer.key());
                evicted += 1;
                info!(peer = %peer.key(), address = %peer.address, error = %e, "peer evicted");
            }
            Err(e) => debug!(peer = %peer.key(), error = %e, "ping failed"),
        }
    }
    evicted
}

/// Broadcasts the routing table plus ourselves.
pub async fn gossip_routing_table(node: &Node) -> Result<BroadcastReport, NodeError> {
    let msg = Message::SyncNodes(SyncNodesData {
        nodes: node.routing_snapshot_with_self(),
    });
    node.broadcast(&msg).await
}

/// Broadcasts the transaction pool as one or more `SyncTransactions`
/// messages, each within `max_frame_length`. Nothing is sent for an empty
/// pool. The report sums every batch.
pub async fn gossip_transaction_pool(node: &Node) -> Result<BroadcastReport, NodeError> {
    let txs = node.get_transactions_of_pool();
    let mut total = BroadcastReport::default();
    for batch in pool_batches(txs, node.config().max_frame_length) {
        let report = node.broadcast(&Message::SyncTransactions(batch)).await?;
        total.delivered += report.delivered;
        total.failed += report.failed;
    }
    Ok(total)
}

/// Splits `txs`, in order, into batches whose encoded `SyncTransactions`
/// envelope is at most `max_frame` bytes. A transaction that cannot fit in
/// any frame is left out.
pub fn pool_batches(txs: Vec<Transaction>, max_frame: usize) -> Vec<Vec<Transaction>> {
    // tag byte + count
    const ENVELOPE: usize = 1 + U64_LENGTH;

    let mut batches = Vec::new();
    let mut batch = Vec::new();
    let mut size = ENVELOPE;
    for tx in txs {
        let cost = U64_LENGTH + tx.encoded_len();
        if ENVELOPE + cost > max_frame {
            warn!(tx = %tx.id_base58(), len = cost, max = max_frame, "transaction too large to gossip");
            continue;
        }
        if size + cost > max_frame {
            batches.push(std::mem::take(&mut batch));
            size = ENVELOPE;
        }
        size += cost;
        batch.push(tx);
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::crypto::KeyPair;

    fn unreachable_address() -> String {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn silent_peers_are_evicted_only_after_invalid_period() {
        let mut config = NodeConfig::with_listen_address("127.0.0.1:0");
        config.io_timeout = Duration::from_millis(300);
        let node = Node::new(KeyPair::generate().unwrap(), config);

        let addr = unreachable_address();
        let mut long_gone = RemoteNode::new(KeyPair::generate().unwrap().public_key(), addr.clone());
        long_gone.last_seen = unix_now() - 3600;
        let just_seen = RemoteNode::new(KeyPair::generate().unwrap().public_key(), addr);
        node.check_and_add_node_to_routing_table(long_gone.clone());
        node.check_and_add_node_to_routing_table(just_seen.clone());

        assert_eq!(sweep_routing_table(&node).await, 1);
        let left = node.get_nodes_of_routing_table();
        assert_eq!(left, vec![just_seen]);
        assert!(node.get_node_by_public_key(&long_gone.key()).is_none());
    }

    #[tokio::test]
    async fn empty_pool_is_not_gossiped() {
        let node = Node::new(
            KeyPair::generate().unwrap(),
            NodeConfig::with_listen_address("127.0.0.1:0"),
        );
        let report = gossip_transaction_pool(&node).await.unwrap();
        assert_eq!(report, BroadcastReport::default());
    }

    fn genesis_txs(n: usize) -> Vec<Transaction> {
        (0..n)
            .map(|_| {
                let kp = KeyPair::generate().unwrap();
                crate::transaction::new_genesis_transaction(&kp, b"hello".to_vec()).unwrap()
            })
            .collect()
    }

    #[test]
    fn pool_batches_respect_the_frame_limit() {
        let txs = genesis_txs(5);
        let per_tx = U64_LENGTH + txs[0].encoded_len();
        // Room for exactly two transactions per frame.
        let max = 1 + U64_LENGTH + 2 * per_tx;

        let batches = pool_batches(txs.clone(), max);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        for batch in &batches {
            let encoded = Message::SyncTransactions(batch.clone()).encode().unwrap();
            assert!(encoded.len() <= max);
        }
        assert_eq!(batches.concat(), txs);

        assert_eq!(pool_batches(txs.clone(), 1 << 20).len(), 1);
        assert!(pool_batches(txs, max / 4).is_empty());
    }

    #[tokio::test]
    async fn broadcast_counts_failures() {
        let mut config = NodeConfig::with_listen_address("127.0.0.1:0");
        config.io_timeout = Duration::from_millis(300);
        let node = Node::new(KeyPair::generate().unwrap(), config);
        for _ in 0..2 {
            node.check_and_add_node_to_routing_table(RemoteNode::new(
                KeyPair::generate().unwrap().public_key(),
                unreachable_address(),
            ));
        }
        let report = gossip_routing_table(&node).await.unwrap();
        assert_eq!(report, BroadcastReport { delivered: 0, failed: 2 });
    }
}
