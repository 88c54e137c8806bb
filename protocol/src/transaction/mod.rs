//! # Transaction Module
//!
//! Construction, signing and verification of microchain transactions.
//!
//! ## Architecture
//!
//! ```text
//! types.rs        TransactionHeader, TxOutput, Transaction and their wire codec
//! builder.rs      TransactionBuilder for unsigned transactions
//! signing.rs      requester / requestee signatures, genesis construction
//! verification.rs confirmed and pending verification rules
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build**: the requester assembles a transaction on top of its chain
//!    tip with [`TransactionBuilder`].
//! 2. **Sign**: [`sign_as_requester`] turns it into a *pending* transaction,
//!    which is sent to the requestee.
//! 3. **Check**: the requestee runs [`verify_pending_transaction`].
//! 4. **Counter-sign**: [`sign_as_requestee`] confirms it. The confirmed
//!    transaction is broadcast and every receiver runs
//!    [`verify_transaction`] before storing it.
//!
//! A node's first transaction is its genesis, created with
//! [`new_genesis_transaction`]: self-to-self, pointing at itself.

pub mod builder;
pub mod signing;
pub mod types;
pub mod verification;

pub use builder::{now_secs, TransactionBuilder};
pub use signing::{new_genesis_transaction, sign_as_requestee, sign_as_requester};
pub use types::{
    by_timestamp, decode_transactions, encode_transactions, Transaction, TransactionHeader,
    TxOutput,
};
pub use verification::{
    verify_pending_transaction, verify_requestee_signature, verify_requester_signature,
    verify_transaction, verify_transaction_id, TransactionError,
};
