use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::transaction::Transaction;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
}

impl AppState {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize, Deserialize)]
pub struct MineResponse {
    pub mined_id: Option<u64>,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct ConsensusResponse {
    pub replaced: bool,
    pub length: usize,
}

/* ---------- TX API Models ---------- */

#[derive(Serialize, Deserialize)]
pub struct PendingResponse {
    pub unconfirmed_transactions: Vec<Transaction>,
}

/* ---------- Peer API Models ---------- */

#[derive(Deserialize, Serialize)]
pub struct RegisterWithRequest {
    #[serde(default)]
    pub node_address: String,
}

#[derive(Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: BTreeMap<String, String>,
}
