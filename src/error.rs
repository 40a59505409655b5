use thiserror::Error;

/// Result alias used across the node.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Every way a node operation can be refused. None of them is fatal to the
/// process: the caller decides what to report.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Missing or malformed field in a transaction, block or message.
    #[error("malformed data: {0}")]
    Structural(String),

    /// Block does not extend the current tip.
    #[error("block #{id} does not link to tip (expected previous hash {expected}, got {actual})")]
    Linkage {
        id: u64,
        expected: String,
        actual: String,
    },

    /// Block hash misses the difficulty target or does not recompute.
    #[error("block #{id} failed proof-of-work check")]
    Proof { id: u64 },

    /// Signature missing, malformed or not valid for the key.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Message sender has no registered public key.
    #[error("unknown peer {0}")]
    UnknownPeer(String),

    /// Network-level failure reaching a peer.
    #[error("peer {addr} unreachable: {reason}")]
    PeerUnreachable { addr: String, reason: String },

    /// Peer answered but refused the request.
    #[error("peer {addr} rejected request: {reason}")]
    Rejected { addr: String, reason: String },

    #[error("nothing to mine")]
    NothingToMine,

    /// The tip moved while a proof-of-work search was running.
    #[error("mining superseded by a chain update")]
    Superseded,

    #[error("proof-of-work worker failed: {0}")]
    Worker(String),

    /// Key generation or encoding failed.
    #[error("key error: {0}")]
    Key(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn unreachable(addr: &str, reason: impl ToString) -> Self {
        LedgerError::PeerUnreachable {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that stem from authentication, including messages
    /// from unregistered senders.
    pub fn is_auth(&self) -> bool {
        matches!(self, LedgerError::Auth(_) | LedgerError::UnknownPeer(_))
    }
}
