use std::collections::BTreeMap;

use log::{debug, info, warn};
use rsa::RsaPublicKey;
use serde::Serialize;

use crate::error::{LedgerError, Result};
use crate::message::{Addressed, KeepAlive, PeerEntry, SignedEnvelope};
use crate::signer::{decode_public_key, verify};

/// Liveness ticks a peer survives without a keep-alive.
pub const DEFAULT_PEER_TIMEOUT: u32 = 5;

/// Peers are keyed by their base URL without a trailing slash.
pub fn normalize_address(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone)]
struct PeerRecord {
    public_key: RsaPublicKey,
    public_key_pem: String,
    ticks_left: u32,
}

/// Registry of the nodes we exchange chain state with, and the keys their
/// messages must be signed with.
#[derive(Debug)]
pub struct PeerDirectory {
    own_address: String,
    timeout: u32,
    peers: BTreeMap<String, PeerRecord>,
}

impl PeerDirectory {
    pub fn new(own_address: &str, timeout: u32) -> Self {
        Self {
            own_address: normalize_address(own_address),
            timeout,
            peers: BTreeMap::new(),
        }
    }

    pub fn own_address(&self) -> &str {
        &self.own_address
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    /// Insert unknown peers with a fresh timeout; refresh known ones. A key
    /// already on file is never replaced. Entries naming this node or
    /// carrying an undecodable key are skipped. Returns the number of peers
    /// newly added.
    pub fn manage(&mut self, entries: &[PeerEntry]) -> usize {
        let mut added = 0;
        for entry in entries {
            let address = normalize_address(&entry.node_address);
            if address.is_empty() || address == self.own_address {
                continue;
            }
            if let Some(record) = self.peers.get_mut(&address) {
                record.ticks_left = self.timeout;
                debug!("peer {address} refreshed");
                continue;
            }
            match decode_public_key(&entry.public_key) {
                Ok(public_key) => {
                    info!("peer {address} registered");
                    self.peers.insert(
                        address,
                        PeerRecord {
                            public_key,
                            public_key_pem: entry.public_key.clone(),
                            ticks_left: self.timeout,
                        },
                    );
                    added += 1;
                }
                Err(e) => warn!("skipping peer {address}: {e}"),
            }
        }
        added
    }

    /// Count one liveness tick down for every peer and evict those that run
    /// out. Returns the evicted addresses.
    pub fn tick_liveness(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        self.peers.retain(|address, record| {
            record.ticks_left = record.ticks_left.saturating_sub(1);
            if record.ticks_left == 0 {
                evicted.push(address.clone());
                false
            } else {
                true
            }
        });
        for address in &evicted {
            info!("peer {address} timed out");
        }
        evicted
    }

    /// Reset the sender's countdown. Returns false for unknown senders.
    pub fn record_keep_alive(&mut self, msg: &KeepAlive) -> bool {
        let address = normalize_address(&msg.node_address);
        match self.peers.get_mut(&address) {
            Some(record) => {
                record.ticks_left = self.timeout;
                debug!("keep-alive from {address}");
                true
            }
            None => false,
        }
    }

    /// Authenticate an envelope against the key registered for the address
    /// inside its payload.
    pub fn verify_message<T: Serialize + Addressed>(
        &self,
        envelope: &SignedEnvelope<T>,
    ) -> Result<()> {
        let address = normalize_address(envelope.msg.node_address());
        let record = self
            .peers
            .get(&address)
            .ok_or_else(|| LedgerError::UnknownPeer(address.clone()))?;
        if verify(&envelope.msg, &envelope.signature, &record.public_key) {
            Ok(())
        } else {
            Err(LedgerError::Auth(format!("bad signature from {address}")))
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.contains_key(&normalize_address(address))
    }

    pub fn public_key(&self, address: &str) -> Option<&RsaPublicKey> {
        self.peers
            .get(&normalize_address(address))
            .map(|r| &r.public_key)
    }

    pub fn ticks_left(&self, address: &str) -> Option<u32> {
        self.peers
            .get(&normalize_address(address))
            .map(|r| r.ticks_left)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Known addresses in ascending order.
    pub fn addresses(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<PeerEntry> {
        self.peers
            .iter()
            .map(|(address, record)| PeerEntry {
                node_address: address.clone(),
                public_key: record.public_key_pem.clone(),
            })
            .collect()
    }

    /// Address -> PEM public key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.peers
            .iter()
            .map(|(address, record)| (address.clone(), record.public_key_pem.clone()))
            .collect()
    }
}
