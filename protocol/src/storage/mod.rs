//! # Storage Module
//!
//! Blocks and the local blockchain. Everything lives in memory; a node
//! starts empty and rebuilds its view from peers.
//!
//! ## Architecture
//!
//! ```text
//! block.rs        BlockHeader, Block, Merkle root, sealing and verification
//! chain.rs        Blockchain: append-only list of verified blocks
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! transaction pool ──seal──► Block ──append──► Blockchain
//! ```
//!
//! Blocks are only used to batch confirmed transactions a node has already
//! accepted into its pool. There is no block gossip and no fork choice.

pub mod block;
pub mod chain;

pub use block::{compute_merkle_root, Block, BlockError, BlockHeader};
pub use chain::Blockchain;
