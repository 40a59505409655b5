//! A minimal peer-to-peer ledger node: proof-of-work chain, pending pool,
//! authenticated peer directory and longest-valid-chain consensus.

pub mod api;
pub mod blockchain;
pub mod codec;
pub mod config;
pub mod consensus;
pub mod error;
pub mod message;
pub mod network;
pub mod node;
pub mod peers;
pub mod signer;
pub mod transaction;

pub use error::{LedgerError, Result};
pub use node::Node;
