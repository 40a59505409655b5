use std::collections::HashSet;
use std::sync::atomic::AtomicBool;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{Block, GENESIS_PREVIOUS_HASH};
use crate::error::{LedgerError, Result};
use crate::transaction::Transaction;

/// Serializable view of a chain, as served to peers and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub length: usize,
    pub chain: Vec<Block>,
}

/// In-memory ledger: accepted blocks plus the pool of transactions waiting
/// to be mined.
#[derive(Debug, Clone)]
pub struct Blockchain {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    difficulty: u32,
}

impl Blockchain {
    /// Initialize a new blockchain with a fresh genesis block.
    pub fn new(difficulty: u32) -> Self {
        Self::with_genesis(difficulty, Block::genesis())
    }

    pub fn with_genesis(difficulty: u32, genesis: Block) -> Self {
        Self {
            chain: vec![genesis],
            pending: Vec::new(),
            difficulty,
        }
    }

    /// Rebuild a chain from a peer's block list. The genesis block is taken
    /// as-is; every later block must be accepted by `add_block`.
    pub fn from_dump(blocks: Vec<Block>, difficulty: u32) -> Result<Self> {
        let mut blocks = blocks.into_iter();
        let genesis = blocks
            .next()
            .ok_or_else(|| LedgerError::Structural("empty chain dump".into()))?;
        let mut bc = Self::with_genesis(difficulty, genesis);
        for block in blocks {
            bc.add_block(block)?;
        }
        Ok(bc)
    }

    /// Return the last block in the chain.
    pub fn last_block(&self) -> &Block {
        self.chain
            .last()
            .expect("Blockchain should always have at least the genesis block")
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            length: self.chain.len(),
            chain: self.chain.clone(),
        }
    }

    /// Queue a transaction for mining. Returns false when a transaction with
    /// the same hash is already pending.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        if self.pending.iter().any(|p| p.hash == tx.hash) {
            debug!("tx {} already pending", tx.hash);
            return false;
        }
        self.pending.push(tx);
        true
    }

    /// Unsealed block holding the whole pool on top of the current tip, or
    /// `None` when there is nothing to mine.
    pub fn next_block(&self) -> Option<Block> {
        if self.pending.is_empty() {
            return None;
        }
        let tip = self.last_block();
        Some(Block::new(tip.id + 1, self.pending.clone(), tip.hash.clone()))
    }

    /// Run the nonce search on `block` at this chain's difficulty.
    pub fn proof_of_work(&self, block: &mut Block, cancel: &AtomicBool) -> Option<String> {
        block.proof_of_work(self.difficulty, cancel)
    }

    /// Seal the pending pool into a new block and append it.
    pub fn mine(&mut self) -> Result<u64> {
        let mut block = self.next_block().ok_or(LedgerError::NothingToMine)?;
        self.proof_of_work(&mut block, &AtomicBool::new(false))
            .ok_or(LedgerError::Superseded)?;
        let id = block.id;
        self.add_block(block)?;
        Ok(id)
    }

    /// Append `block` if it extends the tip and carries a valid proof. The
    /// block's transactions leave the pending pool.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        let tip = self.last_block();
        if block.previous_hash != tip.hash {
            warn!(
                "rejecting block #{}: previous hash {} does not match tip {}",
                block.id, block.previous_hash, tip.hash
            );
            return Err(LedgerError::Linkage {
                id: block.id,
                expected: tip.hash.clone(),
                actual: block.previous_hash,
            });
        }
        if !block.has_valid_proof(self.difficulty) {
            warn!("rejecting block #{}: bad proof {}", block.id, block.hash);
            return Err(LedgerError::Proof { id: block.id });
        }

        let included: HashSet<&str> = block.transactions.iter().map(|t| t.hash.as_str()).collect();
        let before = self.pending.len();
        self.pending.retain(|t| !included.contains(t.hash.as_str()));
        info!(
            "block #{} accepted (hash={}, txs={}, pool {} -> {})",
            block.id,
            block.hash,
            block.transactions.len(),
            before,
            self.pending.len()
        );
        self.chain.push(block);
        Ok(())
    }

    /// Swap in another chain's blocks wholesale. The pending pool is kept.
    pub fn replace_blocks(&mut self, blocks: Vec<Block>) {
        if blocks.is_empty() {
            return;
        }
        self.chain = blocks;
    }

    /// Validate this chain: linkage, hashes and PoW.
    pub fn is_valid(&self) -> bool {
        Self::is_valid_chain(&self.chain, self.difficulty)
    }

    /// Walk a candidate chain from genesis. Every block must recompute to
    /// its stored hash and link to the stored hash of its predecessor; every
    /// block after genesis must also meet the difficulty.
    pub fn is_valid_chain(blocks: &[Block], difficulty: u32) -> bool {
        let Some(genesis) = blocks.first() else {
            return false;
        };
        if genesis.previous_hash != GENESIS_PREVIOUS_HASH || genesis.hash != genesis.compute_hash()
        {
            return false;
        }

        blocks.windows(2).all(|pair| {
            let (prev, current) = (&pair[0], &pair[1]);
            current.previous_hash == prev.hash && current.has_valid_proof(difficulty)
        })
    }
}
