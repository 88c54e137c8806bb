// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # microchain Core Library
//!
//! A small peer-to-peer ledger. Nodes do not agree on one global order of
//! events; instead every node keeps its own chain of dual-signed
//! transactions. A transaction is a statement from a *requester* to a
//! *requestee* that only counts once both of them have signed it, and each
//! one points back at the previous transaction of its requester.
//!
//! ## Architecture
//!
//! - **codec**: fixed-width little-endian encoding helpers.
//! - **crypto**: SHA-256, Base58 and P-256 ECDSA identities.
//! - **transaction**: transaction model, signing and verification.
//! - **storage**: blocks and the in-memory blockchain.
//! - **network**: wire messages, TCP transport, node state, gossip.
//! - **config**: protocol constants and `NodeConfig`.
//!
//! ## Quick start
//!
//! ```no_run
//! use microchain_protocol::config::NodeConfig;
//! use microchain_protocol::crypto::KeyPair;
//! use microchain_protocol::network::Node;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = Node::start(KeyPair::generate()?, NodeConfig::default()).await?;
//! handle.node().broadcast_genesis_transaction(b"hello".to_vec()).await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod transaction;
