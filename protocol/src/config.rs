//! # Protocol Configuration & Constants
//!
//! Every wire width, timer period and network default of microchain lives
//! here. The byte widths are part of the wire format: changing one of them
//! silently partitions the network, so bump them together or not at all.
//!
//! [`NodeConfig`] carries the knobs a running node can tune. It is handed to
//! [`Node::new`](crate::network::Node::new) explicitly; there is no global
//! configuration object.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cryptographic Widths
// ---------------------------------------------------------------------------

/// SHA-256 digest length. Transaction IDs, block IDs and Merkle nodes all
/// use it.
pub const HASH_LENGTH: usize = 32;

/// Uncompressed P-256 public key without the SEC1 tag: X (32) ‖ Y (32).
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// P-256 private scalar.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Fixed-size ECDSA signature: r (32) ‖ s (32).
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Wire Widths
// ---------------------------------------------------------------------------

/// `u32` on the wire. Timestamps and frame lengths.
pub const U32_LENGTH: usize = 4;

/// `u64` on the wire. Every length field.
pub const U64_LENGTH: usize = 8;

/// Transaction ID slot.
pub const TRANSACTION_ID_LENGTH: usize = HASH_LENGTH;

/// Encoded [`TransactionHeader`](crate::transaction::TransactionHeader):
///
/// ```text
/// id[32] | ts[4] | prev[32] | req_pk[64] | req_sig[64]
///        | ree_pk[64] | ree_sig[64] | meta_len[8] | out_len[8]
/// ```
pub const TRANSACTION_HEADER_LENGTH: usize = TRANSACTION_ID_LENGTH
    + U32_LENGTH
    + TRANSACTION_ID_LENGTH
    + PUBLIC_KEY_LENGTH
    + SIGNATURE_LENGTH
    + PUBLIC_KEY_LENGTH
    + SIGNATURE_LENGTH
    + U64_LENGTH
    + U64_LENGTH;

/// Encoded [`TxOutput`](crate::transaction::TxOutput):
/// `accepted[8] | rejected[8] | next_public_key_hash[32]`.
pub const TX_OUTPUT_LENGTH: usize = U64_LENGTH + U64_LENGTH + HASH_LENGTH;

/// Block ID slot.
pub const BLOCK_ID_LENGTH: usize = HASH_LENGTH;

/// Encoded [`BlockHeader`](crate::storage::BlockHeader):
/// `generator[64] | prev[32] | merkle_root[32] | ts[4] | tx_len[8]`.
pub const BLOCK_HEADER_LENGTH: usize =
    PUBLIC_KEY_LENGTH + BLOCK_ID_LENGTH + HASH_LENGTH + U32_LENGTH + U64_LENGTH;

/// Upper bound on a single frame body. A peer announcing more than this is
/// disconnected before we allocate anything.
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// How often every routing-table entry is pinged.
pub const PING_PERIOD: Duration = Duration::from_secs(5);

/// How often the routing table is gossiped to every peer.
pub const BROADCAST_ROUTING_TABLE_PERIOD: Duration = Duration::from_secs(7);

/// How often the transaction pool is gossiped to every peer.
pub const BROADCAST_TRANSACTIONS_POOL_PERIOD: Duration = Duration::from_secs(7);

/// A peer that has not answered a ping for this long is evicted on the next
/// failed ping.
pub const INVALID_PERIOD: Duration = Duration::from_secs(50);

/// Deadline for each individual socket operation (connect, read, write).
pub const IO_TIMEOUT: Duration = Duration::from_secs(3);

/// Capacity of the channel between the accept loop and the dispatcher.
pub const PACKET_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default TCP port for peer traffic.
pub const DEFAULT_P2P_PORT: u16 = 3000;

/// Default port for the admin HTTP API.
pub const DEFAULT_API_PORT: u16 = 8080;

/// Default port for the Prometheus endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9100;

/// Version prefix of the admin API (`/api/v1/...`).
pub const API_VERSION: &str = "v1";

/// Reply payload to a `Ping`.
pub const PING_REPLY: &[u8] = b"pong";

/// Reply payload to every other message.
pub const ACK_REPLY: &[u8] = b"ok";

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for a [`Node`](crate::network::Node).
///
/// Durations are serialized as whole seconds so the struct can be read
/// from a TOML file by the node binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the listener binds to, e.g. `127.0.0.1:3000`.
    pub listen_address: String,

    /// Address advertised to peers. Defaults to `listen_address` when empty.
    pub advertised_address: String,

    /// Peers pinged and joined at start-up.
    pub bootstrap_peers: Vec<String>,

    #[serde(with = "duration_secs")]
    pub ping_period: Duration,

    #[serde(with = "duration_secs")]
    pub broadcast_routing_table_period: Duration,

    #[serde(with = "duration_secs")]
    pub broadcast_transactions_pool_period: Duration,

    #[serde(with = "duration_secs")]
    pub invalid_period: Duration,

    /// Per-operation socket deadline.
    #[serde(with = "duration_secs")]
    pub io_timeout: Duration,

    /// Upper bound on a single inbound frame.
    pub max_frame_length: usize,

    /// Re-run full verification on transactions that arrive through
    /// `SyncTransactions`. Turning this off trusts whatever peers gossip.
    pub verify_gossiped_transactions: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_address: format!("127.0.0.1:{}", DEFAULT_P2P_PORT),
            advertised_address: String::new(),
            bootstrap_peers: Vec::new(),
            ping_period: PING_PERIOD,
            broadcast_routing_table_period: BROADCAST_ROUTING_TABLE_PERIOD,
            broadcast_transactions_pool_period: BROADCAST_TRANSACTIONS_POOL_PERIOD,
            invalid_period: INVALID_PERIOD,
            io_timeout: IO_TIMEOUT,
            max_frame_length: MAX_FRAME_LENGTH,
            verify_gossiped_transactions: true,
        }
    }
}

impl NodeConfig {
    /// Builds a config listening on `listen_address` with every other knob
    /// at its default.
    pub fn with_listen_address(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            ..Self::default()
        }
    }

    /// The address peers should use to reach us.
    pub fn advertised(&self) -> &str {
        if self.advertised_address.is_empty() {
            &self.listen_address
        } else {
            &self.advertised_address
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_widths_add_up() {
        assert_eq!(TRANSACTION_HEADER_LENGTH, 340);
        assert_eq!(TX_OUTPUT_LENGTH, 48);
        assert_eq!(BLOCK_HEADER_LENGTH, 140);
    }

    #[test]
    fn gossip_periods_match_reference_deployment() {
        assert_eq!(PING_PERIOD.as_secs(), 5);
        assert_eq!(BROADCAST_ROUTING_TABLE_PERIOD.as_secs(), 7);
        assert_eq!(BROADCAST_TRANSACTIONS_POOL_PERIOD.as_secs(), 7);
        assert_eq!(INVALID_PERIOD.as_secs(), 50);
        // Eviction must survive several missed pings.
        assert!(INVALID_PERIOD > PING_PERIOD * 5);
    }

    #[test]
    fn advertised_falls_back_to_listen_address() {
        let mut cfg = NodeConfig::with_listen_address("127.0.0.1:4000");
        assert_eq!(cfg.advertised(), "127.0.0.1:4000");

        cfg.advertised_address = "10.0.0.7:4000".into();
        assert_eq!(cfg.advertised(), "10.0.0.7:4000");
    }

    #[test]
    fn node_config_json_roundtrip_uses_seconds() {
        let cfg = NodeConfig::default();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["ping_period"], 5);
        assert_eq!(json["invalid_period"], 50);

        let back: NodeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: NodeConfig =
            serde_json::from_str(r#"{ "listen_address": "0.0.0.0:3100" }"#).unwrap();
        assert_eq!(cfg.listen_address, "0.0.0.0:3100");
        assert_eq!(cfg.ping_period, PING_PERIOD);
        assert!(cfg.verify_gossiped_transactions);
    }
}
