//! Loopback integration tests for microchain nodes.
//!
//! Every test starts real nodes on `127.0.0.1:0`, wires their routing
//! tables by hand or through `join`, and talks over TCP. Gossip periods are
//! stretched to an hour unless a test is about gossip, so background
//! traffic never races the assertions.

use std::time::Duration;

use tokio::net::TcpStream;

use microchain_protocol::config::NodeConfig;
use microchain_protocol::crypto::KeyPair;
use microchain_protocol::network::transport::{read_frame, write_frame};
use microchain_protocol::network::{gossip, BroadcastReport, Message, Node, NodeHandle, RemoteNode};
use microchain_protocol::transaction::new_genesis_transaction;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn quiet_config() -> NodeConfig {
    let mut config = NodeConfig::with_listen_address("127.0.0.1:0");
    config.ping_period = Duration::from_secs(3600);
    config.broadcast_routing_table_period = Duration::from_secs(3600);
    config.broadcast_transactions_pool_period = Duration::from_secs(3600);
    config.io_timeout = Duration::from_secs(2);
    config
}

async fn start(config: NodeConfig) -> NodeHandle {
    Node::start(KeyPair::generate().unwrap(), config)
        .await
        .unwrap()
}

/// Makes `from` know `to`.
fn link(from: &NodeHandle, to: &NodeHandle) {
    let to = to.node();
    assert!(from
        .node()
        .check_and_add_node_to_routing_table(RemoteNode::new(to.public_key(), to.address())));
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn genesis_reaches_peer() {
    let a = start(quiet_config()).await;
    let b = start(quiet_config()).await;
    link(&a, &b);

    let (genesis, report) = a
        .node()
        .broadcast_genesis_transaction(b"hello".to_vec())
        .await
        .unwrap();
    assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });

    let pool = b.node().get_transactions_of_pool();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].meta, b"hello");
    assert_eq!(pool[0].id(), genesis.id());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn pending_confirm_broadcast_reaches_every_peer() {
    let a = start(quiet_config()).await;
    let b = start(quiet_config()).await;
    let c = start(quiet_config()).await;
    link(&a, &b);
    link(&b, &a);
    link(&b, &c);

    let (genesis, _) = a
        .node()
        .broadcast_genesis_transaction(b"hello".to_vec())
        .await
        .unwrap();

    let pending = a
        .node()
        .send_pending_transaction(&b.node().public_key_string(), b"lend 20".to_vec())
        .await
        .unwrap();
    assert_eq!(pending.prev_id(), genesis.id());

    let id = pending.id_base58();
    let waiting = b.node().get_pending_transactions();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id_base58(), id);

    let (confirmed, report) = b.node().confirm_pending_transaction(&id).await.unwrap();
    assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
    assert!(confirmed.is_confirmed());

    for peer in [&a, &c] {
        let got = peer.node().get_transaction_by_id_from_pool(&id).unwrap();
        assert_eq!(got.id(), confirmed.id());
        assert!(got.is_confirmed());
    }
    assert_eq!(a.node().prev_transaction().unwrap().id_base58(), id);
    assert_eq!(b.node().prev_transaction().unwrap().id_base58(), id);
    assert!(b.node().get_pending_transactions().is_empty());

    for n in [a, b, c] {
        n.shutdown().await;
    }
}

#[tokio::test]
async fn pending_for_someone_else_is_refused() {
    let a = start(quiet_config()).await;
    let b = start(quiet_config()).await;
    link(&a, &b);
    a.node()
        .broadcast_genesis_transaction(Vec::new())
        .await
        .unwrap();

    // Address b, but name a stranger as requestee.
    let stranger = KeyPair::generate().unwrap().public_key();
    let tx = a.node().new_pending_transaction(stranger, Vec::new()).unwrap();
    let res = a
        .node()
        .send(b.node().address(), &Message::PendingTransaction(tx))
        .await;
    assert!(res.is_err());
    assert!(b.node().get_pending_transactions().is_empty());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn join_then_routing_gossip_converges() {
    let mut config = quiet_config();
    config.broadcast_routing_table_period = Duration::from_millis(200);
    let a = start(config).await;

    let mut config = quiet_config();
    config.bootstrap_peers = vec![a.node().address().to_string()];
    let b = start(config).await;

    // The ping of the join puts b into a's table right away.
    assert!(a
        .node()
        .get_node_by_public_key(&b.node().public_key_string())
        .is_some());

    // a's routing gossip includes itself, which teaches b about a.
    let a_key = a.node().public_key_string();
    eventually("b to learn about a", || {
        b.node().get_node_by_public_key(&a_key).is_some()
    })
    .await;

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn pool_gossip_spreads_transactions() {
    let a = start(quiet_config()).await;
    let b = start(quiet_config()).await;

    // a holds its genesis but never broadcast it.
    let g = a.node().new_genesis_transaction(b"quiet".to_vec()).unwrap();
    a.node().set_genesis_transaction(g.clone()).unwrap();
    link(&a, &b);

    let report = gossip::gossip_transaction_pool(a.node()).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(b
        .node()
        .get_transaction_by_id_from_pool(&g.id_base58())
        .is_some());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn pool_larger_than_a_frame_is_gossiped_in_batches() {
    let mut config = quiet_config();
    config.max_frame_length = 2048;
    let a = start(config.clone()).await;
    let b = start(config).await;
    link(&a, &b);

    let txs: Vec<_> = (0..12)
        .map(|_| new_genesis_transaction(&KeyPair::generate().unwrap(), b"bulk".to_vec()).unwrap())
        .collect();
    for tx in &txs {
        a.node().check_and_add_transaction_to_pool(tx.clone());
    }
    // The whole pool would not fit in one frame.
    assert!(Message::SyncTransactions(txs.clone()).encode().unwrap().len() > 2048);

    let report = gossip::gossip_transaction_pool(a.node()).await.unwrap();
    assert_eq!(report.failed, 0);
    assert!(report.delivered > 1);
    assert_eq!(b.node().get_transactions_of_pool().len(), txs.len());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn dead_peer_is_evicted_by_the_sweep() {
    let mut config = quiet_config();
    config.invalid_period = Duration::ZERO;
    config.io_timeout = Duration::from_millis(500);
    let a = start(config).await;
    let b = start(quiet_config()).await;
    link(&a, &b);
    let b_key = b.node().public_key_string();

    // Alive: the sweep refreshes instead of evicting.
    assert_eq!(gossip::sweep_routing_table(a.node()).await, 0);
    assert!(a.node().get_node_by_public_key(&b_key).is_some());

    b.shutdown().await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(gossip::sweep_routing_table(a.node()).await, 1);
    assert!(a.node().get_nodes_of_routing_table().is_empty());

    a.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_get_no_reply() {
    let a = start(quiet_config()).await;

    for body in [&b""[..], &[0x02, b'{', b'}'][..], &[0x09][..], &[0x04, 1, 2][..]] {
        let mut stream = TcpStream::connect(a.node().address()).await.unwrap();
        write_frame(&mut stream, body).await.unwrap();
        assert!(read_frame(&mut stream, 1024).await.is_err());
    }

    // The node is still serving.
    let b = start(quiet_config()).await;
    b.node().ping(a.node().address()).await.unwrap();

    a.shutdown().await;
    b.shutdown().await;
}
