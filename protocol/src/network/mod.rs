//! # Network Module
//!
//! Peer-to-peer plumbing for microchain: wire messages, TCP transport, the
//! node's shared state and the loops that keep it in sync with its peers.
//!
//! ## Architecture
//!
//! ```text
//! message.rs      MessageType tags, Message tagged union, JSON payloads
//! transport.rs    length-prefixed framing, deadlines, send, accept loop
//! pool.rs         RoutingTable and TransactionPool, one RwLock each
//! node.rs         Node aggregate and every public node operation
//! dispatch.rs     exhaustive match over inbound messages
//! gossip.rs       liveness sweep, routing-table and pool gossip
//! ```
//!
//! ## Design Decisions
//!
//! - Every connection carries exactly one request and one reply. There is
//!   no session state, so a peer can restart at any time.
//! - Locks are `parking_lot::RwLock` and never cross an `.await`. Async
//!   code copies what it needs out of a guard and lets it go.
//! - Nothing here touches global state. Each node carries its own config
//!   and tracing span, so several nodes can share one process.

pub mod dispatch;
pub mod gossip;
pub mod message;
pub mod node;
pub mod pool;
pub mod transport;

pub use message::{Message, MessageType, PingData, RemoteNode, SyncNodesData};
pub use node::{BroadcastReport, Node, NodeError, NodeHandle, NodeStatus};
pub use pool::{RoutingTable, TransactionPool};
pub use transport::{NetworkError, Packet};
