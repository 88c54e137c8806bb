//! # Wire Messages
//!
//! Every request between nodes is a single envelope:
//!
//! ```text
//! ┌──────────┬──────────────────────────┐
//! │ type[1]  │ data[..]                 │
//! └──────────┴──────────────────────────┘
//! ```
//!
//! `Ping` and `SyncNodes` carry JSON. The transaction-bearing messages carry
//! the binary transaction codec. Tags `0x02` and `0x06` belong to messages
//! that were specified but never used; they are reserved and refused on
//! decode so that nobody can start relying on them silently.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::crypto::PublicKey;
use crate::transaction::{decode_transactions, encode_transactions, Transaction};

// ---------------------------------------------------------------------------
// Message Type Tags
// ---------------------------------------------------------------------------

/// One-byte tag at the start of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0x01,
    /// Reserved.
    Join = 0x02,
    SyncNodes = 0x03,
    SendTransaction = 0x04,
    PendingTransaction = 0x05,
    /// Reserved.
    BroadcastTransaction = 0x06,
    SyncTransactions = 0x07,
}

impl MessageType {
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Join | Self::BroadcastTransaction)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(Self::Ping),
            0x02 => Ok(Self::Join),
            0x03 => Ok(Self::SyncNodes),
            0x04 => Ok(Self::SendTransaction),
            0x05 => Ok(Self::PendingTransaction),
            0x06 => Ok(Self::BroadcastTransaction),
            0x07 => Ok(Self::SyncTransactions),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ping => "ping",
            Self::Join => "join",
            Self::SyncNodes => "sync_nodes",
            Self::SendTransaction => "send_transaction",
            Self::PendingTransaction => "pending_transaction",
            Self::BroadcastTransaction => "broadcast_transaction",
            Self::SyncTransactions => "sync_transactions",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A peer as this node knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub public_key: PublicKey,
    pub address: String,
    /// Unix seconds of the last successful contact.
    #[serde(rename = "lastseen")]
    pub last_seen: u64,
}

impl RemoteNode {
    /// A peer seen right now.
    pub fn new(public_key: PublicKey, address: impl Into<String>) -> Self {
        Self {
            public_key,
            address: address.into(),
            last_seen: unix_now(),
        }
    }

    /// Routing-table key.
    pub fn key(&self) -> String {
        self.public_key.to_base58()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingData {
    pub public_key: PublicKey,
    #[serde(rename = "server_addr")]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncNodesData {
    pub nodes: Vec<RemoteNode>,
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping(PingData),
    SyncNodes(SyncNodesData),
    /// A confirmed transaction pushed to a peer.
    SendTransaction(Transaction),
    /// A requester-signed transaction for the requestee to confirm.
    PendingTransaction(Transaction),
    SyncTransactions(Vec<Transaction>),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Ping(_) => MessageType::Ping,
            Self::SyncNodes(_) => MessageType::SyncNodes,
            Self::SendTransaction(_) => MessageType::SendTransaction,
            Self::PendingTransaction(_) => MessageType::PendingTransaction,
            Self::SyncTransactions(_) => MessageType::SyncTransactions,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![self.message_type() as u8];
        match self {
            Self::Ping(data) => serde_json::to_writer(&mut out, data)?,
            Self::SyncNodes(data) => serde_json::to_writer(&mut out, data)?,
            Self::SendTransaction(tx) | Self::PendingTransaction(tx) => tx.encode_into(&mut out),
            Self::SyncTransactions(txs) => out.extend_from_slice(&encode_transactions(txs)),
        }
        Ok(out)
    }

    pub fn decode(envelope: &[u8]) -> Result<Self, CodecError> {
        let (&tag, data) = envelope.split_first().ok_or(CodecError::EmptyEnvelope)?;
        let kind = MessageType::try_from(tag)?;
        match kind {
            MessageType::Ping => Ok(Self::Ping(serde_json::from_slice(data)?)),
            MessageType::SyncNodes => Ok(Self::SyncNodes(serde_json::from_slice(data)?)),
            MessageType::SendTransaction => Ok(Self::SendTransaction(Transaction::decode(data)?)),
            MessageType::PendingTransaction => {
                Ok(Self::PendingTransaction(Transaction::decode(data)?))
            }
            MessageType::SyncTransactions => {
                Ok(Self::SyncTransactions(decode_transactions(data)?))
            }
            MessageType::Join | MessageType::BroadcastTransaction => {
                Err(CodecError::ReservedMessageType(tag))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
