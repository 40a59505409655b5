//! The node: owns the ledger state and exposes every operation the
//! transport layer can invoke.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use log::{debug, info, warn};

use crate::blockchain::{Block, Blockchain, ChainSnapshot, unix_now};
use crate::config::NodeConfig;
use crate::consensus;
use crate::error::{LedgerError, Result};
use crate::message::{
    Introduction, KeepAlive, PeerEntry, PeerUpdate, RegisterReply, SignedEnvelope,
};
use crate::network::PeerClient;
use crate::peers::{PeerDirectory, normalize_address};
use crate::signer::{self, Signer};
use crate::transaction::{NewTransaction, Transaction};

/// Shared node state. Chain and peer directory sit behind separate locks
/// that are never held across an `.await` or a proof-of-work search.
pub struct Node {
    address: String,
    signer: Signer,
    chain: Mutex<Blockchain>,
    peers: Mutex<PeerDirectory>,
    client: Arc<dyn PeerClient>,
    /// Serializes mining attempts.
    mining: tokio::sync::Mutex<()>,
    /// Raised whenever the tip moves so a running search can give up.
    cancel_mining: Arc<AtomicBool>,
}

impl Node {
    /// Node with a fresh genesis block and a newly generated key.
    pub fn new(config: &NodeConfig, client: Arc<dyn PeerClient>) -> Result<Self> {
        Self::with_chain(config, client, Blockchain::new(config.difficulty))
    }

    pub fn with_chain(
        config: &NodeConfig,
        client: Arc<dyn PeerClient>,
        chain: Blockchain,
    ) -> Result<Self> {
        let address = normalize_address(&config.node_address);
        Ok(Self {
            peers: Mutex::new(PeerDirectory::new(&address, config.peer_timeout)),
            address,
            signer: Signer::generate()?,
            chain: Mutex::new(chain),
            client,
            mining: tokio::sync::Mutex::new(()),
            cancel_mining: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key_pem(&self) -> &str {
        self.signer.public_key_pem()
    }

    fn lock_chain(&self) -> MutexGuard<'_, Blockchain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_peers(&self) -> MutexGuard<'_, PeerDirectory> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn own_entry(&self) -> PeerEntry {
        PeerEntry {
            node_address: self.address.clone(),
            public_key: self.signer.public_key_pem().to_string(),
        }
    }

    /* -------------------- Peer membership -------------------- */

    /// Handle a first-contact introduction. The sender cannot be
    /// authenticated by the directory yet; it only has to prove it holds the
    /// key it is registering. Known peers are told about the newcomer and
    /// the newcomer gets our chain and peer list back.
    pub async fn introduce(&self, intro: Introduction) -> Result<SignedEnvelope<RegisterReply>> {
        let newcomer = normalize_address(&intro.msg.node_address);
        if newcomer.is_empty() || intro.msg.public_key.trim().is_empty() {
            return Err(LedgerError::Structural(
                "node_address and public_key required".into(),
            ));
        }
        if newcomer == self.address {
            return Err(LedgerError::Structural("cannot register with self".into()));
        }
        signer::verify_self_signed(&intro)?;

        let (entries, others) = {
            let mut peers = self.lock_peers();
            peers.manage(std::slice::from_ref(&intro.msg));
            let others: Vec<String> = peers
                .addresses()
                .into_iter()
                .filter(|a| *a != newcomer)
                .collect();
            (peers.entries(), others)
        };

        let update = self.signer.create_message(PeerUpdate {
            node_address: self.address.clone(),
            peers: entries.clone(),
        })?;
        let client = self.client.as_ref();
        let update = &update;
        broadcast(&others, "peer update", move |peer| async move {
            client.update_peers(&peer, update).await
        })
        .await;

        let blockchain = self.chain_snapshot();
        self.signer.create_message(RegisterReply {
            node_address: self.address.clone(),
            public_key: self.signer.public_key_pem().to_string(),
            blockchain,
            peers: entries,
        })
    }

    /// Introduce ourselves to `remote`, learn its peers and adopt its chain.
    pub async fn register_with(&self, remote: &str) -> Result<()> {
        let remote = normalize_address(remote);
        if remote.is_empty() {
            return Err(LedgerError::Structural("node_address required".into()));
        }
        let intro = self.signer.create_message(self.own_entry())?;
        let reply = self.client.register(&remote, &intro).await?;

        // first contact in the other direction: the reply can only be
        // checked against the key it carries
        let key = signer::decode_public_key(&reply.msg.public_key)?;
        if !signer::verify(&reply.msg, &reply.signature, &key) {
            return Err(LedgerError::Auth(format!("reply from {remote} not signed by its key")));
        }
        let RegisterReply {
            node_address,
            public_key,
            blockchain,
            peers,
        } = reply.msg;

        if blockchain.length != blockchain.chain.len() {
            return Err(LedgerError::Structural("chain length mismatch".into()));
        }
        let difficulty = self.lock_chain().difficulty();
        if !Blockchain::is_valid_chain(&blockchain.chain, difficulty) {
            return Err(LedgerError::Structural(format!(
                "chain from {remote} failed validation"
            )));
        }

        {
            let mut directory = self.lock_peers();
            directory.manage(&[PeerEntry {
                node_address,
                public_key,
            }]);
            directory.manage(&peers);
        }
        {
            let mut chain = self.lock_chain();
            chain.replace_blocks(blockchain.chain);
            self.cancel_mining.store(true, Ordering::SeqCst);
        }
        info!("registered with {remote}");
        Ok(())
    }

    /// Authenticated keep-alive from a peer.
    pub fn receive_keep_alive(&self, envelope: &SignedEnvelope<KeepAlive>) -> Result<()> {
        let mut peers = self.lock_peers();
        peers.verify_message(envelope)?;
        peers.record_keep_alive(&envelope.msg);
        Ok(())
    }

    /// One liveness tick, then tell every remaining peer we are alive.
    /// Returns the peers evicted by this tick.
    pub async fn send_keep_alive(&self) -> Result<Vec<String>> {
        let (evicted, targets) = {
            let mut peers = self.lock_peers();
            let evicted = peers.tick_liveness();
            (evicted, peers.addresses())
        };
        let msg = self.signer.create_message(KeepAlive {
            node_address: self.address.clone(),
            time: unix_now(),
        })?;
        let client = self.client.as_ref();
        let msg = &msg;
        broadcast(&targets, "keep-alive", move |peer| async move {
            client.keep_alive(&peer, msg).await
        })
        .await;
        Ok(evicted)
    }

    /// Authenticated peer list from a known node. Returns how many peers
    /// were new to us.
    pub fn update_peers(&self, envelope: &SignedEnvelope<PeerUpdate>) -> Result<usize> {
        let mut peers = self.lock_peers();
        peers.verify_message(envelope)?;
        Ok(peers.manage(&envelope.msg.peers))
    }

    /* -------------------- Transactions -------------------- */

    /// Accept a client transaction and gossip it to every peer.
    pub async fn submit_transaction(&self, req: NewTransaction) -> Result<Transaction> {
        let tx = Transaction::from_request(req)?;
        let fresh = self.lock_chain().add_transaction(tx.clone());
        if fresh {
            info!("tx {} from {} queued", tx.hash, tx.author);
            let targets = self.lock_peers().addresses();
            let client = self.client.as_ref();
            let shared = &tx;
            broadcast(&targets, "transaction", move |peer| async move {
                client.announce_transaction(&peer, shared).await
            })
            .await;
        }
        Ok(tx)
    }

    /// Transaction gossiped by a peer; queued without further fan-out.
    /// Returns false if it was already pending.
    pub fn announce_transaction(&self, tx: Transaction) -> Result<bool> {
        let tx = tx.seal()?;
        let fresh = self.lock_chain().add_transaction(tx);
        Ok(fresh)
    }

    /* -------------------- Blocks -------------------- */

    /// Block announced by a peer.
    pub fn add_block(&self, block: Block) -> Result<()> {
        let mut chain = self.lock_chain();
        chain.add_block(block)?;
        self.cancel_mining.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Seal the pending pool into a block. Only one mining attempt runs at a
    /// time; the search itself runs on a blocking worker without the chain
    /// lock and is abandoned if the tip moves meanwhile. After sealing, the
    /// node syncs with its peers and announces the block only if it is still
    /// the tip.
    pub async fn mine(&self) -> Result<u64> {
        let _mining = self.mining.lock().await;

        let (block, difficulty) = self.prepare_block()?;
        debug!(
            "mining block #{} with {} txs at difficulty {}",
            block.id,
            block.transactions.len(),
            difficulty
        );

        let cancel = Arc::clone(&self.cancel_mining);
        let sealed = tokio::task::spawn_blocking(move || {
            let mut block = block;
            block.proof_of_work(difficulty, &cancel).map(|_| block)
        })
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))?
        .ok_or(LedgerError::Superseded)?;

        let id = sealed.id;
        let announced = sealed.clone();
        self.commit_sealed(sealed)?;
        info!("mined block #{id} (hash={})", announced.hash);

        self.consensus().await;
        let still_tip = self.lock_chain().last_block().hash == announced.hash;
        if still_tip {
            let targets = self.lock_peers().addresses();
            let client = self.client.as_ref();
            let announced = &announced;
            broadcast(&targets, "block", move |peer| async move {
                client.announce_block(&peer, announced).await
            })
            .await;
        } else {
            info!("block #{id} superseded by a peer chain, not announcing");
        }
        Ok(id)
    }

    /// Unsealed block over the whole pool on the current tip, plus the
    /// difficulty to seal it at. Lowers the cancel flag for the new search.
    fn prepare_block(&self) -> Result<(Block, u32)> {
        let chain = self.lock_chain();
        let block = chain.next_block().ok_or(LedgerError::NothingToMine)?;
        self.cancel_mining.store(false, Ordering::SeqCst);
        Ok((block, chain.difficulty()))
    }

    /// Append a block this node sealed. If the tip moved during the search
    /// the block no longer links and is refused as `Superseded`; chain and
    /// pool stay as they are.
    fn commit_sealed(&self, sealed: Block) -> Result<()> {
        self.lock_chain().add_block(sealed).map_err(|e| match e {
            LedgerError::Linkage { .. } => LedgerError::Superseded,
            other => other,
        })
    }

    /* -------------------- Consensus -------------------- */

    /// Replace the local chain with the best valid peer chain, if any beats
    /// it. Returns whether the chain was replaced.
    pub async fn consensus(&self) -> bool {
        let peers = self.lock_peers().addresses();
        if peers.is_empty() {
            return false;
        }
        let candidates = consensus::collect_candidates(self.client.as_ref(), &peers).await;

        let mut chain = self.lock_chain();
        let winner = consensus::select_chain(chain.blocks(), candidates, chain.difficulty());
        match winner {
            Some(winner) => {
                chain.replace_blocks(winner.snapshot.chain);
                self.cancel_mining.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /* -------------------- Views -------------------- */

    pub fn chain_snapshot(&self) -> ChainSnapshot {
        self.lock_chain().snapshot()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.lock_chain().pending().to_vec()
    }

    pub fn peers(&self) -> BTreeMap<String, String> {
        self.lock_peers().snapshot()
    }

    pub fn peer_ticks_left(&self, address: &str) -> Option<u32> {
        self.lock_peers().ticks_left(address)
    }
}

/// Send to every peer concurrently. Failures are logged and skipped; they
/// never fail the operation that triggered the fan-out.
async fn broadcast<F, Fut>(peers: &[String], what: &str, send: F)
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if peers.is_empty() {
        return;
    }
    let results = join_all(peers.iter().cloned().map(&send)).await;
    for (peer, result) in peers.iter().zip(results) {
        match result {
            Ok(()) => debug!("{what} delivered to {peer}"),
            Err(e) => warn!("{what} to {peer} skipped: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LocalNetwork;
    use async_trait::async_trait;
    use serde_json::json;

    fn config(address: &str) -> NodeConfig {
        NodeConfig {
            node_address: address.into(),
            difficulty: 1,
            peer_timeout: 3,
            ..NodeConfig::default()
        }
    }

    fn spawn(net: &Arc<LocalNetwork>, address: &str) -> Arc<Node> {
        let node = Arc::new(Node::new(&config(address), net.clone()).unwrap());
        net.attach(&node);
        node
    }

    fn request(author: &str, content: &str) -> NewTransaction {
        serde_json::from_value(json!({"author": author, "content": content})).unwrap()
    }

    #[tokio::test]
    async fn mine_empty_pool_reports_nothing() {
        let net = LocalNetwork::new();
        let a = spawn(&net, "http://a");
        assert!(matches!(a.mine().await, Err(LedgerError::NothingToMine)));
        assert_eq!(a.chain_snapshot().length, 1);
    }

    #[tokio::test]
    async fn submit_then_mine_alone() {
        let net = LocalNetwork::new();
        let a = spawn(&net, "http://a");
        a.submit_transaction(request("a", "hi")).await.unwrap();
        assert_eq!(a.pending().len(), 1);

        let id = a.mine().await.unwrap();

        assert_eq!(id, 1);
        assert!(a.pending().is_empty());
        let snap = a.chain_snapshot();
        assert_eq!(snap.length, 2);
        assert!(snap.chain[1].hash.starts_with('0'));
    }

    #[tokio::test]
    async fn structural_errors_reach_the_caller() {
        let net = LocalNetwork::new();
        let a = spawn(&net, "http://a");
        let err = a.submit_transaction(request("a", "")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Structural(_)));
        assert!(a.pending().is_empty());
    }

    #[tokio::test]
    async fn keep_alive_from_unregistered_node_rejected() {
        let net = LocalNetwork::new();
        let a = spawn(&net, "http://a");
        let stranger = Signer::generate().unwrap();
        let env = stranger
            .create_message(KeepAlive {
                node_address: "http://stranger".into(),
                time: unix_now(),
            })
            .unwrap();
        let err = a.receive_keep_alive(&env).unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn self_registration_refused() {
        let net = LocalNetwork::new();
        let a = spawn(&net, "http://a");
        let intro = a.signer.create_message(a.own_entry()).unwrap();
        assert!(matches!(
            a.introduce(intro).await,
            Err(LedgerError::Structural(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_search_reports_superseded() {
        let net = LocalNetwork::new();
        let a = Arc::new(Node::new(
            &NodeConfig {
                difficulty: 64,
                ..config("http://a")
            },
            net.clone(),
        )
        .unwrap());
        a.submit_transaction(request("a", "never sealed")).await.unwrap();

        let miner = {
            let a = a.clone();
            tokio::spawn(async move { a.mine().await })
        };
        // wait until the search is running, then pull the rug
        while a.mining.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        a.cancel_mining.store(true, Ordering::SeqCst);

        let outcome = miner.await.unwrap();
        assert!(matches!(outcome, Err(LedgerError::Superseded)));
        assert_eq!(a.pending().len(), 1);
        assert_eq!(a.chain_snapshot().length, 1);
    }

    #[tokio::test]
    async fn block_sealed_on_stale_tip_is_superseded() {
        let net = LocalNetwork::new();
        let a = spawn(&net, "http://a");
        a.submit_transaction(request("a", "mine me")).await.unwrap();
        let (mut ours, difficulty) = a.prepare_block().unwrap();

        // a peer's block lands while our search is still running
        let genesis = a.chain_snapshot().chain[0].hash.clone();
        let mut theirs = Block::new(1, vec![Transaction::new("b", "from a peer")], genesis);
        theirs.proof_of_work(difficulty, &AtomicBool::new(false)).unwrap();
        a.add_block(theirs.clone()).unwrap();
        assert!(a.cancel_mining.load(Ordering::SeqCst));

        ours.proof_of_work(difficulty, &AtomicBool::new(false)).unwrap();
        assert!(matches!(a.commit_sealed(ours), Err(LedgerError::Superseded)));

        let snap = a.chain_snapshot();
        assert_eq!(snap.length, 2);
        assert_eq!(snap.chain[1], theirs);
        let pending = a.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "mine me");
    }

    /// Answers every registration with a signed reply whose genesis block
    /// does not hash to its stored hash.
    struct ForgedGenesis {
        signer: Signer,
    }

    #[async_trait]
    impl PeerClient for ForgedGenesis {
        async fn register(
            &self,
            peer: &str,
            _intro: &Introduction,
        ) -> Result<SignedEnvelope<RegisterReply>> {
            let mut genesis = Block::genesis_at(1_600_000_000.0);
            genesis.timestamp += 1.0;
            self.signer.create_message(RegisterReply {
                node_address: peer.to_string(),
                public_key: self.signer.public_key_pem().to_string(),
                blockchain: ChainSnapshot {
                    length: 1,
                    chain: vec![genesis],
                },
                peers: Vec::new(),
            })
        }

        async fn keep_alive(&self, _peer: &str, _msg: &SignedEnvelope<KeepAlive>) -> Result<()> {
            Ok(())
        }

        async fn update_peers(&self, _peer: &str, _msg: &SignedEnvelope<PeerUpdate>) -> Result<()> {
            Ok(())
        }

        async fn announce_transaction(&self, _peer: &str, _tx: &Transaction) -> Result<()> {
            Ok(())
        }

        async fn announce_block(&self, _peer: &str, _block: &Block) -> Result<()> {
            Ok(())
        }

        async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot> {
            Err(LedgerError::unreachable(peer, "not serving chains"))
        }
    }

    #[tokio::test]
    async fn registration_refuses_chain_with_broken_genesis() {
        let forger = ForgedGenesis {
            signer: Signer::generate().unwrap(),
        };
        let a = Node::new(&config("http://a"), Arc::new(forger)).unwrap();
        let before = a.chain_snapshot();

        let err = a.register_with("http://forger").await.unwrap_err();

        assert!(matches!(err, LedgerError::Structural(_)));
        assert_eq!(a.chain_snapshot(), before);
        assert!(a.peers().is_empty());
    }
}
