//! Payloads exchanged between nodes and the signed envelope that carries
//! them.

use serde::{Deserialize, Serialize};

use crate::blockchain::ChainSnapshot;

/// A payload plus a signature over its canonical encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope<T> {
    pub msg: T,
    pub signature: String,
}

/// Payloads that name the node that sent them. The sender's registered key
/// is looked up by this address when the envelope is verified.
pub trait Addressed {
    fn node_address(&self) -> &str;
}

/// `{node_address, public_key}` pair, used for introductions and peer lists.
/// The public key is an RSA SubjectPublicKeyInfo in PEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub node_address: String,
    pub public_key: String,
}

/// First contact. The receiver has no key for the sender yet, so the
/// envelope is only checked against the key it carries itself.
pub type Introduction = SignedEnvelope<PeerEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAlive {
    pub node_address: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerUpdate {
    pub node_address: String,
    pub peers: Vec<PeerEntry>,
}

/// Answer to an introduction: who we are, our chain and who we know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReply {
    pub node_address: String,
    pub public_key: String,
    pub blockchain: ChainSnapshot,
    pub peers: Vec<PeerEntry>,
}

impl Addressed for PeerEntry {
    fn node_address(&self) -> &str {
        &self.node_address
    }
}

impl Addressed for KeepAlive {
    fn node_address(&self) -> &str {
        &self.node_address
    }
}

impl Addressed for PeerUpdate {
    fn node_address(&self) -> &str {
        &self.node_address
    }
}

impl Addressed for RegisterReply {
    fn node_address(&self) -> &str {
        &self.node_address
    }
}
