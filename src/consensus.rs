//! Longest-valid-chain reconciliation.
//!
//! Candidates are compared by length, then by tip hash (lower wins), with
//! the local chain as the starting incumbent. The outcome therefore does
//! not depend on the order peers are queried in.

use std::cmp::Ordering;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::blockchain::{Block, Blockchain, ChainSnapshot};
use crate::network::PeerClient;

/// A chain reported by a peer.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub peer: String,
    pub snapshot: ChainSnapshot,
}

/// Fetch every peer's chain concurrently. Unreachable peers are skipped.
pub async fn collect_candidates(client: &dyn PeerClient, peers: &[String]) -> Vec<Candidate> {
    let responses = join_all(peers.iter().map(|peer| client.fetch_chain(peer))).await;
    peers
        .iter()
        .zip(responses)
        .filter_map(|(peer, response)| match response {
            Ok(snapshot) => Some(Candidate {
                peer: peer.clone(),
                snapshot,
            }),
            Err(e) => {
                warn!("consensus: skipping {peer}: {e}");
                None
            }
        })
        .collect()
}

/// Order two chains: longer first, then the lower tip hash.
fn compare(a: &[Block], b: &[Block]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        let tip = |c: &[Block]| c.last().map(|blk| blk.hash.clone()).unwrap_or_default();
        tip(b).cmp(&tip(a))
    })
}

/// Pick the best valid candidate that beats `local`. Returns `None` when the
/// local chain should be kept.
pub fn select_chain(
    local: &[Block],
    candidates: Vec<Candidate>,
    difficulty: u32,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;

    for candidate in candidates {
        let snapshot = &candidate.snapshot;
        if snapshot.length != snapshot.chain.len() {
            warn!(
                "consensus: {} reported length {} but sent {} blocks",
                candidate.peer,
                snapshot.length,
                snapshot.chain.len()
            );
            continue;
        }

        let incumbent = best.as_ref().map_or(local, |b| b.snapshot.chain.as_slice());
        if compare(&snapshot.chain, incumbent) != Ordering::Greater {
            debug!("consensus: {} does not beat current best", candidate.peer);
            continue;
        }

        let rebuilt = Blockchain::from_dump(snapshot.chain.clone(), difficulty);
        if rebuilt.is_err() || !Blockchain::is_valid_chain(&snapshot.chain, difficulty) {
            warn!("consensus: chain from {} failed validation", candidate.peer);
            continue;
        }

        best = Some(candidate);
    }

    if let Some(winner) = &best {
        info!(
            "consensus: adopting chain of length {} from {}",
            winner.snapshot.length, winner.peer
        );
    }
    best
}
