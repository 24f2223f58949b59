use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashSet;

use super::difficulty::DifficultyStrategy;
use super::mining::MiningEngine;
use super::{
    Block, GENESIS_PREVIOUS_PROOF, GENESIS_TIMESTAMP_MS, INITIAL_DIFFICULTY, MAX_FUTURE_DRIFT_MS,
};
use crate::config::ChainParams;
use crate::error::{ChainError, Result, TransactionError};
use crate::transaction::{Amount, OutputSource, Transaction, TransactionValidator, TxOutput};

/// In-memory proof-of-work chain with its pending transaction pool.
///
/// Every block, mined locally or received from a peer, enters through
/// [`Blockchain::add_block`].
#[derive(Debug)]
pub struct Blockchain {
    chain: Vec<Block>,
    mempool: Vec<Transaction>,
    strategy: Box<dyn DifficultyStrategy>,
    engine: MiningEngine,
    params: ChainParams,
}

impl Blockchain {
    /// Initialize a new blockchain with a mined genesis block.
    pub fn new(params: ChainParams) -> Result<Self> {
        let genesis = Self::build_genesis(&params)?;
        Ok(Self::with_genesis(genesis, params))
    }

    fn with_genesis(genesis: Block, params: ChainParams) -> Self {
        Self {
            chain: vec![genesis],
            mempool: Vec::new(),
            strategy: params
                .strategy
                .build(params.initial_difficulty, params.ema),
            engine: MiningEngine::new(params.nonce_space),
            params,
        }
    }

    /// The genesis block is a pure function of the params, so nodes sharing
    /// params share a genesis.
    fn build_genesis(params: &ChainParams) -> Result<Block> {
        let mut genesis = Block::genesis(INITIAL_DIFFICULTY, GENESIS_TIMESTAMP_MS);
        if let Some(alloc) = &params.genesis_allocation {
            let mut tx = Transaction::with_timestamp(
                0,
                Vec::new(),
                vec![TxOutput {
                    recipient: alloc.address.clone(),
                    amount: alloc.amount,
                }],
                Amount::ZERO,
                GENESIS_TIMESTAMP_MS,
            );
            tx.hash()?;
            genesis.add_transaction(tx)?;
        }
        genesis.finalize_commitment();

        let found = MiningEngine::default().mine_sequential(&genesis)?;
        genesis.seal(found.nonce, found.proof);
        info!(
            "genesis block sealed: proof={} allocation={}",
            genesis.proof,
            params.genesis_allocation.is_some()
        );
        Ok(genesis)
    }

    /// Return the last block in the chain.
    pub fn last_block(&self) -> &Block {
        self.chain
            .last()
            .expect("Blockchain should always have at least the genesis block")
    }

    pub fn block_at(&self, height: u64) -> Option<&Block> {
        usize::try_from(height).ok().and_then(|h| self.chain.get(h))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    /// Index of the newest block.
    pub fn height(&self) -> u64 {
        self.last_block().index
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Difficulty the next block must meet.
    pub fn difficulty(&self) -> u32 {
        self.strategy.difficulty()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    /// Handle sharing the cancellation flag of this chain's miner.
    pub fn mining_handle(&self) -> MiningEngine {
        self.engine.clone()
    }

    /// Append to the pending pool without validation.
    pub fn add_transaction(&mut self, mut tx: Transaction) -> Result<String> {
        let id = match tx.proof.clone() {
            Some(p) => p,
            None => tx.hash()?,
        };
        self.mempool.push(tx);
        Ok(id)
    }

    /// Validate against the chain, then add to the pool.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<String> {
        TransactionValidator::validate(&tx, &*self)?;
        let id = tx.id()?;
        if self.mempool.iter().any(|t| t.proof.as_deref() == Some(id.as_str())) {
            return Err(TransactionError::Duplicate(id).into());
        }
        let claimed: HashSet<(&str, u32)> = self
            .mempool
            .iter()
            .flat_map(|t| t.inputs.iter())
            .map(|i| (i.tx_hash.as_str(), i.output_index))
            .collect();
        if let Some(input) = tx
            .inputs
            .iter()
            .find(|i| claimed.contains(&(i.tx_hash.as_str(), i.output_index)))
        {
            return Err(TransactionError::AlreadySpent {
                tx_hash: input.tx_hash.clone(),
                output_index: input.output_index,
            }
            .into());
        }
        debug!("tx {} accepted into mempool", id);
        self.add_transaction(tx)
    }

    /// Unsealed, finalized block on top of the tip carrying `transactions`,
    /// at the difficulty the chain will demand for it.
    pub fn candidate_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let now = Utc::now().timestamp_millis();
        self.candidate_block_at(transactions, now.max(self.last_block().timestamp))
    }

    pub fn candidate_block_at(
        &self,
        transactions: Vec<Transaction>,
        timestamp: i64,
    ) -> Result<Block> {
        let tip = self.last_block();
        let mut block = Block::new_with_timestamp(
            tip.index + 1,
            tip.proof.clone(),
            self.difficulty(),
            timestamp,
        );
        block.difficulty = self.strategy.difficulty_for(&block, tip);
        for tx in transactions {
            block.add_transaction(tx)?;
        }
        block.finalize_commitment();
        Ok(block)
    }

    /// Cut a candidate from the pending pool. The returned job carries its
    /// own miner, so the nonce search can run without borrowing the chain.
    pub fn prepare_mining(&self) -> Result<MiningJob> {
        let (selected, rejected) = self.select_transactions(&self.mempool);
        Ok(MiningJob {
            candidate: self.candidate_block(selected)?,
            rejected,
            engine: self.engine.clone(),
            workers: self.params.mining_workers,
        })
    }

    /// Append a sealed job through [`Blockchain::add_block`] and clean its
    /// transactions out of the pool. A job whose tip moved in the meantime
    /// is refused and leaves the pool as it was.
    pub fn commit_mined(&mut self, job: MiningJob) -> Result<&Block> {
        let MiningJob {
            candidate,
            rejected,
            ..
        } = job;
        let included: HashSet<String> = candidate
            .transactions
            .iter()
            .filter_map(|t| t.proof.clone())
            .collect();
        self.add_block(candidate)?;

        let before = self.mempool.len();
        self.mempool.retain(|t| match t.proof.as_deref() {
            Some(id) => !included.contains(id) && !rejected.contains(id),
            None => true,
        });
        debug!(
            "mempool cleaned: {} -> {} ({} included, {} rejected)",
            before,
            self.mempool.len(),
            included.len(),
            rejected.len()
        );
        Ok(self.last_block())
    }

    /// Mine the pending pool into a new block and append it.
    pub fn mine(&mut self) -> Result<&Block> {
        let mut job = self.prepare_mining()?;
        job.run()?;
        self.commit_mined(job)
    }

    /// Valid, mutually non-conflicting transactions from `pool`, in pool
    /// order, plus the ids of the invalid ones.
    fn select_transactions(&self, pool: &[Transaction]) -> (Vec<Transaction>, HashSet<String>) {
        let mut selected = Vec::new();
        let mut rejected = HashSet::new();
        let mut ids = HashSet::new();
        let mut claimed = HashSet::<(String, u32)>::new();

        for tx in pool {
            let id = match tx.id() {
                Ok(id) => id,
                Err(e) => {
                    warn!("skipping unhashable tx: {}", e);
                    continue;
                }
            };
            if let Err(e) = TransactionValidator::validate(tx, self) {
                warn!("dropping tx {} from mempool: {}", id, e);
                rejected.insert(id);
                continue;
            }
            let conflicts = tx
                .inputs
                .iter()
                .any(|i| claimed.contains(&(i.tx_hash.clone(), i.output_index)));
            if conflicts || !ids.insert(id.clone()) {
                debug!("skipping tx {}: conflicts with a selected transaction", id);
                continue;
            }
            claimed.extend(
                tx.inputs
                    .iter()
                    .map(|i| (i.tx_hash.clone(), i.output_index)),
            );
            selected.push(tx.clone());
        }
        (selected, rejected)
    }

    /// The single acceptance gate for new blocks: index, linkage,
    /// timestamp, commitment, difficulty, proof of work and transactions are
    /// checked before the block is appended and the difficulty retargeted.
    pub fn add_block(&mut self, block: Block) -> Result<&Block> {
        self.check_block(&block).inspect_err(|e| match e {
            ChainError::ChainLinkage { .. } => error!("rejected block #{}: {}", block.index, e),
            _ => warn!("rejected block #{}: {}", block.index, e),
        })?;

        // The gap behind block 1 measures the fixed genesis timestamp, not
        // mining speed, so the controller never sees it.
        let previous = self.last_block();
        let interval_secs = (previous.index > 0)
            .then(|| (block.timestamp - previous.timestamp).max(0) as f64 / 1000.0);
        info!(
            "block #{} accepted: proof={} nonce={} difficulty={} txs={}",
            block.index,
            block.proof,
            block.nonce,
            block.difficulty,
            block.transactions.len()
        );
        self.chain.push(block);
        // Any search still running targets the old tip.
        self.engine.cancel();

        if let Some(secs) = interval_secs {
            self.strategy.observe(secs);
        }
        let len = self.chain.len();
        let tip = &self.chain[len - 1];
        self.strategy.retarget(len, tip);
        Ok(tip)
    }

    fn check_block(&self, block: &Block) -> Result<()> {
        let tip = self.last_block();
        let invalid = |reason: String| ChainError::InvalidBlock {
            index: block.index,
            reason,
        };

        if block.index != tip.index + 1 {
            return Err(invalid(format!("expected index {}", tip.index + 1)));
        }
        if block.previous_proof != tip.proof {
            return Err(ChainError::ChainLinkage {
                index: block.index,
                expected: tip.proof.clone(),
                actual: block.previous_proof.clone(),
            });
        }
        if block.timestamp < tip.timestamp {
            return Err(invalid(format!(
                "timestamp {} precedes previous block at {}",
                block.timestamp, tip.timestamp
            )));
        }
        let horizon = Utc::now().timestamp_millis() + MAX_FUTURE_DRIFT_MS;
        if block.timestamp > horizon {
            return Err(invalid(format!(
                "timestamp {} is beyond the allowed horizon {}",
                block.timestamp, horizon
            )));
        }
        if block.computed_commitment()? != block.commitment {
            return Err(invalid("commitment does not match transactions".into()));
        }
        let expected = self.strategy.difficulty_for(block, tip);
        if block.difficulty != expected {
            return Err(invalid(format!(
                "difficulty {} but chain requires {}",
                block.difficulty, expected
            )));
        }
        if !block.verify_proof() {
            return Err(invalid("proof of work does not verify".into()));
        }

        let mut claimed = HashSet::<(&str, u32)>::new();
        for tx in &block.transactions {
            TransactionValidator::validate(tx, self)?;
            for input in &tx.inputs {
                if !claimed.insert((input.tx_hash.as_str(), input.output_index)) {
                    return Err(TransactionError::DuplicateInput {
                        tx_hash: input.tx_hash.clone(),
                        output_index: input.output_index,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// An on-chain output. Scans from the newest block back.
    pub fn fetch_output(&self, tx_hash: &str, output_index: u32) -> Result<&TxOutput> {
        self.chain
            .iter()
            .rev()
            .find_map(|b| b.fetch_output(tx_hash, output_index).ok())
            .ok_or_else(|| ChainError::OutputNotFound {
                tx_hash: tx_hash.to_string(),
                output_index,
            })
    }

    pub fn fetch_output_amount(&self, tx_hash: &str, output_index: u32) -> Result<Amount> {
        self.fetch_output(tx_hash, output_index).map(|o| o.amount)
    }

    pub fn is_output_spent(&self, tx_hash: &str, output_index: u32) -> bool {
        self.chain.iter().any(|b| b.spends(tx_hash, output_index))
    }

    /// Validate the entire chain by replaying every block through the
    /// acceptance rules on top of a freshly rebuilt genesis.
    pub fn is_valid_chain(&self) -> bool {
        let Some(genesis) = self.chain.first() else {
            return false;
        };
        match Self::build_genesis(&self.params) {
            Ok(expected) if expected.proof == genesis.proof => {}
            _ => {
                warn!("genesis block does not match chain params");
                return false;
            }
        }
        if genesis.index != 0
            || genesis.previous_proof != GENESIS_PREVIOUS_PROOF
            || genesis.computed_commitment().ok().as_deref() != Some(genesis.commitment.as_str())
            || !genesis.verify_proof()
        {
            return false;
        }

        let mut replay = Self::with_genesis(genesis.clone(), self.params.clone());
        for block in self.chain.iter().skip(1) {
            if let Err(e) = replay.add_block(block.clone()) {
                warn!("chain invalid at block #{}: {}", block.index, e);
                return false;
            }
        }
        true
    }
}

impl OutputSource for Blockchain {
    fn fetch_output(&self, tx_hash: &str, output_index: u32) -> Result<TxOutput> {
        Blockchain::fetch_output(self, tx_hash, output_index).cloned()
    }

    fn fetch_output_amount(&self, tx_hash: &str, output_index: u32) -> Result<Amount> {
        Blockchain::fetch_output_amount(self, tx_hash, output_index)
    }

    fn is_output_spent(&self, tx_hash: &str, output_index: u32) -> bool {
        Blockchain::is_output_spent(self, tx_hash, output_index)
    }
}

/// A candidate block plus the miner that will seal it.
///
/// Produced by [`Blockchain::prepare_mining`] and handed back through
/// [`Blockchain::commit_mined`].
#[derive(Debug)]
pub struct MiningJob {
    candidate: Block,
    rejected: HashSet<String>,
    engine: MiningEngine,
    workers: usize,
}

impl MiningJob {
    pub fn candidate(&self) -> &Block {
        &self.candidate
    }

    /// Search for a nonce and seal the candidate.
    pub fn run(&mut self) -> Result<()> {
        let found = if self.workers > 1 {
            self.engine.mine_concurrent(&self.candidate, self.workers)?
        } else {
            self.engine.mine_sequential(&self.candidate)?
        };
        self.candidate.seal(found.nonce, found.proof);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::difficulty::{EmaParams, StrategyKind};
    use crate::crypto::Hash256;
    use crate::config::GenesisAllocation;
    use crate::transaction::TxInput;
    use crate::wallet::KeyPair;

    fn params(alloc: Option<&KeyPair>) -> ChainParams {
        ChainParams {
            mining_workers: 1,
            ema: EmaParams {
                adjustment_interval: 1_000,
                ..EmaParams::default()
            },
            genesis_allocation: alloc.map(|k| GenesisAllocation {
                address: k.address(),
                amount: Amount::from_coins(10).unwrap(),
            }),
            ..ChainParams::default()
        }
    }

    fn genesis_tx_id(bc: &Blockchain) -> String {
        bc.blocks()[0].transactions[0].id().unwrap()
    }

    /// Signed spend of genesis output 0: `to` receives `amount`, rest is fee.
    fn spend_genesis(bc: &Blockchain, owner: &KeyPair, amount: &str, fee: &str) -> Transaction {
        let mut tx = Transaction::new(
            1,
            vec![TxInput {
                tx_hash: genesis_tx_id(bc),
                output_index: 0,
            }],
            vec![TxOutput {
                recipient: KeyPair::generate().address(),
                amount: amount.parse().unwrap(),
            }],
            fee.parse().unwrap(),
        );
        tx.sign(owner).unwrap();
        tx
    }

    fn sealed(mut block: Block) -> Block {
        let found = MiningEngine::default().mine_sequential(&block).unwrap();
        block.seal(found.nonce, found.proof);
        block
    }

    /// EMA chain starting at difficulty 3 that retargets every other block.
    fn retargeting(strategy: StrategyKind) -> ChainParams {
        ChainParams {
            initial_difficulty: 3,
            strategy,
            ema: EmaParams {
                adjustment_interval: 2,
                ..EmaParams::default()
            },
            ..params(None)
        }
    }

    /// Seal an empty block stamped `timestamp` and append it.
    fn append_at(bc: &mut Blockchain, timestamp: i64) -> u32 {
        let block = sealed(bc.candidate_block_at(Vec::new(), timestamp).unwrap());
        bc.add_block(block).unwrap().difficulty
    }

    fn stub_never(_: &[u8]) -> Hash256 {
        Hash256([0xff; 32])
    }

    #[test]
    fn new_chain_has_mined_genesis() {
        let bc = Blockchain::new(params(None)).unwrap();
        let g = bc.last_block();
        assert_eq!(bc.len(), 1);
        assert_eq!(bc.height(), 0);
        assert_eq!(g.previous_proof, GENESIS_PREVIOUS_PROOF);
        assert_eq!(g.difficulty, 1);
        assert!(g.verify_proof());
        assert!(bc.is_valid_chain());
    }

    #[test]
    fn genesis_is_deterministic() {
        let owner = KeyPair::generate();
        let a = Blockchain::new(params(Some(&owner))).unwrap();
        let b = Blockchain::new(params(Some(&owner))).unwrap();
        assert_eq!(a.last_block().proof, b.last_block().proof);
    }

    #[test]
    fn genesis_allocation_is_spendable() {
        let owner = KeyPair::generate();
        let bc = Blockchain::new(params(Some(&owner))).unwrap();
        assert_eq!(
            bc.fetch_output_amount(&genesis_tx_id(&bc), 0).unwrap(),
            Amount::from_coins(10).unwrap()
        );
        assert!(!bc.is_output_spent(&genesis_tx_id(&bc), 0));
        assert!(matches!(
            bc.fetch_output_amount("nope", 0),
            Err(ChainError::OutputNotFound { .. })
        ));
    }

    #[test]
    fn mine_includes_valid_transactions_and_cleans_pool() {
        let owner = KeyPair::generate();
        let mut bc = Blockchain::new(params(Some(&owner))).unwrap();

        let tx = spend_genesis(&bc, &owner, "9.0", "1.0");
        let id = bc.submit_transaction(tx).unwrap();
        assert_eq!(bc.mempool().len(), 1);

        let block = bc.mine().unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 1);
        assert!(bc.mempool().is_empty());
        assert!(bc.is_output_spent(&genesis_tx_id(&bc), 0));
        assert_eq!(
            bc.fetch_output_amount(&id, 0).unwrap(),
            "9.0".parse().unwrap()
        );
        assert!(bc.is_valid_chain());
    }

    #[test]
    fn double_spend_is_rejected() {
        let owner = KeyPair::generate();
        let mut bc = Blockchain::new(params(Some(&owner))).unwrap();
        bc.submit_transaction(spend_genesis(&bc, &owner, "9.0", "1.0"))
            .unwrap();

        // Same output again while the first spend is pending.
        let again = spend_genesis(&bc, &owner, "8.0", "2.0");
        assert!(matches!(
            bc.submit_transaction(again.clone()),
            Err(ChainError::InvalidTransaction(
                TransactionError::AlreadySpent { .. }
            ))
        ));

        bc.mine().unwrap();
        assert!(matches!(
            bc.submit_transaction(again),
            Err(ChainError::InvalidTransaction(
                TransactionError::AlreadySpent { .. }
            ))
        ));
    }

    #[test]
    fn invalid_pool_entries_are_dropped_at_mining() {
        let owner = KeyPair::generate();
        let mut bc = Blockchain::new(params(Some(&owner))).unwrap();
        bc.add_transaction(spend_genesis(&bc, &owner, "9.0", "0.5")).unwrap();
        bc.add_transaction(spend_genesis(&bc, &owner, "9.0", "1.0")).unwrap();

        let block = bc.mine().unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert!(bc.mempool().is_empty());
    }

    #[test]
    fn conflicting_pool_entries_are_not_mined_together() {
        let owner = KeyPair::generate();
        let mut bc = Blockchain::new(params(Some(&owner))).unwrap();
        bc.add_transaction(spend_genesis(&bc, &owner, "9.0", "1.0")).unwrap();
        bc.add_transaction(spend_genesis(&bc, &owner, "8.0", "2.0")).unwrap();

        assert_eq!(bc.mine().unwrap().transactions.len(), 1);
        // The loser is now a double spend and goes at the next round.
        assert_eq!(bc.mempool().len(), 1);
        assert!(bc.mine().unwrap().transactions.is_empty());
        assert!(bc.mempool().is_empty());
    }

    #[test]
    fn add_block_rejects_broken_linkage() {
        let mut bc = Blockchain::new(params(None)).unwrap();
        bc.mine().unwrap();

        let mut block = bc.candidate_block(Vec::new()).unwrap();
        block.previous_proof = "ff".repeat(32);
        block.finalize_commitment();
        let block = sealed(block);

        assert!(matches!(
            bc.add_block(block),
            Err(ChainError::ChainLinkage { index: 2, .. })
        ));
        assert_eq!(bc.len(), 2);
    }

    #[test]
    fn add_block_rejects_wrong_index_commitment_difficulty_and_pow() {
        let mut bc = Blockchain::new(params(None)).unwrap();

        let mut wrong_index = bc.candidate_block(Vec::new()).unwrap();
        wrong_index.index = 5;
        assert!(matches!(
            bc.add_block(sealed(wrong_index)),
            Err(ChainError::InvalidBlock { index: 5, .. })
        ));

        let mut wrong_commitment = bc.candidate_block(Vec::new()).unwrap();
        wrong_commitment.commitment = "00".repeat(32);
        assert!(matches!(
            bc.add_block(sealed(wrong_commitment)),
            Err(ChainError::InvalidBlock { .. })
        ));

        let mut wrong_difficulty = bc.candidate_block(Vec::new()).unwrap();
        wrong_difficulty.difficulty = 2;
        assert!(matches!(
            bc.add_block(sealed(wrong_difficulty)),
            Err(ChainError::InvalidBlock { .. })
        ));

        let mut bad_pow = sealed(bc.candidate_block(Vec::new()).unwrap());
        bad_pow.proof = "f".repeat(64);
        assert!(matches!(
            bc.add_block(bad_pow),
            Err(ChainError::InvalidBlock { .. })
        ));

        assert_eq!(bc.len(), 1);
        let good = sealed(bc.candidate_block(Vec::new()).unwrap());
        assert_eq!(bc.add_block(good).unwrap().index, 1);
    }

    #[test]
    fn add_block_validates_transactions() {
        let owner = KeyPair::generate();
        let mut bc = Blockchain::new(params(Some(&owner))).unwrap();

        let unbalanced = spend_genesis(&bc, &owner, "9.0", "0.5");
        let block = sealed(bc.candidate_block(vec![unbalanced]).unwrap());
        assert!(matches!(
            bc.add_block(block),
            Err(ChainError::InvalidTransaction(
                TransactionError::Unbalanced { .. }
            ))
        ));

        let a = spend_genesis(&bc, &owner, "9.0", "1.0");
        let b = spend_genesis(&bc, &owner, "8.0", "2.0");
        let block = sealed(bc.candidate_block(vec![a, b]).unwrap());
        assert!(matches!(
            bc.add_block(block),
            Err(ChainError::InvalidTransaction(
                TransactionError::DuplicateInput { .. }
            ))
        ));
    }

    #[test]
    fn linkage_holds_across_mined_blocks() {
        let mut bc = Blockchain::new(params(None)).unwrap();
        for _ in 0..4 {
            bc.mine().unwrap();
        }
        for pair in bc.blocks().windows(2) {
            assert_eq!(pair[1].previous_proof, pair[0].proof);
            assert_eq!(pair[1].index, pair[0].index + 1);
        }
        assert_eq!(bc.height(), 4);
        assert!(bc.block_at(4).is_some());
        assert!(bc.block_at(5).is_none());
    }

    #[test]
    fn tampering_invalidates_the_chain() {
        let mut bc = Blockchain::new(params(None)).unwrap();
        bc.mine().unwrap();
        bc.mine().unwrap();
        assert!(bc.is_valid_chain());

        bc.chain[1].nonce += 1;
        assert!(!bc.is_valid_chain());
    }

    #[test]
    fn concurrent_mining_appends_valid_blocks() {
        let mut bc = Blockchain::new(ChainParams {
            mining_workers: 4,
            ..params(None)
        })
        .unwrap();
        bc.mine().unwrap();
        bc.mine().unwrap();
        assert_eq!(bc.len(), 3);
        assert!(bc.is_valid_chain());
    }

    #[test]
    fn genesis_gap_does_not_drive_the_first_retarget() {
        let mut bc = Blockchain::new(retargeting(StrategyKind::Ema)).unwrap();
        // Block 1 lands years after the fixed genesis timestamp.
        let block = bc.mine().unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.difficulty, 3);
        assert_eq!(bc.difficulty(), 3);
    }

    #[test]
    fn block_timestamps_drive_retargets_and_replay() {
        let mut bc = Blockchain::new(retargeting(StrategyKind::Ema)).unwrap();
        let spacing = 600_000;
        let seen: Vec<u32> = (1..=6)
            .map(|i| append_at(&mut bc, GENESIS_TIMESTAMP_MS + i * spacing))
            .collect();

        // Ten-minute blocks against a one-minute target walk difficulty down.
        assert_eq!(seen, vec![3, 3, 3, 2, 2, 1]);
        assert_eq!(bc.difficulty(), 1);
        assert!(bc.is_valid_chain());

        let mut stale = bc
            .candidate_block_at(Vec::new(), GENESIS_TIMESTAMP_MS + 7 * spacing)
            .unwrap();
        stale.difficulty = 2;
        assert!(matches!(
            bc.add_block(sealed(stale)),
            Err(ChainError::InvalidBlock { index: 7, .. })
        ));
    }

    #[test]
    fn bomb_strategy_chain_replays() {
        let mut bc = Blockchain::new(retargeting(StrategyKind::Bomb)).unwrap();
        assert_eq!(bc.strategy_name(), "bomb");

        let mut at = GENESIS_TIMESTAMP_MS;
        for gap in [2_000, 60_000, 5_000, 30_000] {
            at += gap;
            let previous = bc.last_block().clone();
            let candidate = bc.candidate_block_at(Vec::new(), at).unwrap();
            assert_eq!(candidate.difficulty, candidate.calculate_difficulty(&previous));
            bc.add_block(sealed(candidate)).unwrap();
        }
        assert_eq!(bc.height(), 4);
        assert_eq!(bc.difficulty(), bc.last_block().difficulty);
        assert!(bc.is_valid_chain());

        let mut wrong = bc.candidate_block_at(Vec::new(), at + 1_000).unwrap();
        wrong.difficulty += 1;
        assert!(matches!(
            bc.add_block(sealed(wrong)),
            Err(ChainError::InvalidBlock { .. })
        ));
    }

    #[test]
    fn add_block_enforces_timestamp_bounds() {
        let mut bc = Blockchain::new(params(None)).unwrap();
        append_at(&mut bc, GENESIS_TIMESTAMP_MS + 60_000);

        let before_tip = bc
            .candidate_block_at(Vec::new(), GENESIS_TIMESTAMP_MS + 59_999)
            .unwrap();
        assert!(matches!(
            bc.add_block(sealed(before_tip)),
            Err(ChainError::InvalidBlock { index: 2, .. })
        ));

        let day = 24 * 60 * 60 * 1000;
        let far_future = bc
            .candidate_block_at(Vec::new(), Utc::now().timestamp_millis() + day)
            .unwrap();
        assert!(matches!(
            bc.add_block(sealed(far_future)),
            Err(ChainError::InvalidBlock { index: 2, .. })
        ));

        let same_instant = bc
            .candidate_block_at(Vec::new(), GENESIS_TIMESTAMP_MS + 60_000)
            .unwrap();
        assert_eq!(bc.add_block(sealed(same_instant)).unwrap().index, 2);
    }

    #[test]
    fn stale_mining_job_is_rejected_and_keeps_the_pool() {
        let owner = KeyPair::generate();
        let mut bc = Blockchain::new(params(Some(&owner))).unwrap();
        bc.submit_transaction(spend_genesis(&bc, &owner, "9.0", "1.0"))
            .unwrap();

        let mut job = bc.prepare_mining().unwrap();
        assert_eq!(job.candidate().transactions.len(), 1);

        // Another block wins the race while the job is searching.
        let rival = sealed(bc.candidate_block(Vec::new()).unwrap());
        bc.add_block(rival).unwrap();

        job.run().unwrap();
        assert!(matches!(
            bc.commit_mined(job),
            Err(ChainError::InvalidBlock { index: 1, .. })
        ));
        assert_eq!(bc.len(), 2);
        assert_eq!(bc.mempool().len(), 1);

        assert_eq!(bc.mine().unwrap().transactions.len(), 1);
        assert!(bc.mempool().is_empty());
    }

    #[test]
    fn accepted_block_cancels_a_running_search() {
        let mut bc = Blockchain::new(ChainParams {
            nonce_space: 200_000_000,
            ..params(None)
        })
        .unwrap();
        let candidate = bc.candidate_block(Vec::new()).unwrap();
        let miner = bc.mining_handle().with_digest(stub_never);
        let rival = sealed(bc.candidate_block(Vec::new()).unwrap());

        let result = std::thread::scope(|s| {
            let search = s.spawn(|| miner.mine_concurrent(&candidate, 2));
            std::thread::sleep(std::time::Duration::from_millis(100));
            bc.add_block(rival).unwrap();
            search.join().unwrap()
        });
        assert!(matches!(result, Err(ChainError::MiningCancelled(1))));
    }
}
