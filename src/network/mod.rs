//! Outbound side of the node: everything it needs to say to other nodes.

pub mod http;
pub mod local;

use async_trait::async_trait;

use crate::blockchain::{Block, ChainSnapshot};
use crate::error::Result;
use crate::message::{Introduction, KeepAlive, PeerUpdate, RegisterReply, SignedEnvelope};
use crate::transaction::Transaction;

pub use http::HttpPeerClient;
pub use local::LocalNetwork;

/// Prefix every node route lives under.
pub const API_PREFIX: &str = "/api/v1";

/// Capability to reach another node. Each call is one request/response
/// pair; a peer that cannot be reached yields `PeerUnreachable`.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn register(
        &self,
        peer: &str,
        intro: &Introduction,
    ) -> Result<SignedEnvelope<RegisterReply>>;

    async fn keep_alive(&self, peer: &str, msg: &SignedEnvelope<KeepAlive>) -> Result<()>;

    async fn update_peers(&self, peer: &str, msg: &SignedEnvelope<PeerUpdate>) -> Result<()>;

    async fn announce_transaction(&self, peer: &str, tx: &Transaction) -> Result<()>;

    async fn announce_block(&self, peer: &str, block: &Block) -> Result<()>;

    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot>;
}
