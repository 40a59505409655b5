//! In-process network: nodes registered here call each other's operations
//! directly. Used for simulations and multi-node tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;

use super::PeerClient;
use crate::blockchain::{Block, ChainSnapshot};
use crate::error::{LedgerError, Result};
use crate::message::{Introduction, KeepAlive, PeerUpdate, RegisterReply, SignedEnvelope};
use crate::node::Node;
use crate::peers::normalize_address;
use crate::transaction::Transaction;

#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<String, Weak<Node>>>,
    offline: RwLock<HashSet<String>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `node` reachable under its own address.
    pub fn attach(&self, node: &Arc<Node>) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_address(node.address()), Arc::downgrade(node));
    }

    /// Simulate a peer dropping off the network (or coming back).
    pub fn set_online(&self, address: &str, online: bool) {
        let mut offline = self.offline.write().unwrap_or_else(PoisonError::into_inner);
        if online {
            offline.remove(&normalize_address(address));
        } else {
            offline.insert(normalize_address(address));
        }
    }

    fn resolve(&self, peer: &str) -> Result<Arc<Node>> {
        let address = normalize_address(peer);
        let offline = self
            .offline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&address);
        if offline {
            return Err(LedgerError::unreachable(peer, "offline"));
        }
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| LedgerError::unreachable(peer, "no such node"))
    }
}

fn refused(peer: &str, err: LedgerError) -> LedgerError {
    LedgerError::Rejected {
        addr: peer.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl PeerClient for LocalNetwork {
    async fn register(
        &self,
        peer: &str,
        intro: &Introduction,
    ) -> Result<SignedEnvelope<RegisterReply>> {
        let node = self.resolve(peer)?;
        node.introduce(intro.clone())
            .await
            .map_err(|e| refused(peer, e))
    }

    async fn keep_alive(&self, peer: &str, msg: &SignedEnvelope<KeepAlive>) -> Result<()> {
        let node = self.resolve(peer)?;
        node.receive_keep_alive(msg).map_err(|e| refused(peer, e))
    }

    async fn update_peers(&self, peer: &str, msg: &SignedEnvelope<PeerUpdate>) -> Result<()> {
        let node = self.resolve(peer)?;
        node.update_peers(msg)
            .map(drop)
            .map_err(|e| refused(peer, e))
    }

    async fn announce_transaction(&self, peer: &str, tx: &Transaction) -> Result<()> {
        let node = self.resolve(peer)?;
        node.announce_transaction(tx.clone())
            .map(drop)
            .map_err(|e| refused(peer, e))
    }

    async fn announce_block(&self, peer: &str, block: &Block) -> Result<()> {
        let node = self.resolve(peer)?;
        node.add_block(block.clone()).map_err(|e| refused(peer, e))
    }

    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot> {
        Ok(self.resolve(peer)?.chain_snapshot())
    }
}
