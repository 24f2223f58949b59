use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::commitment::CommitmentTree;
use super::{
    BOMB_FAST_THRESHOLD_SECS, BOMB_FREE_PERIODS, BOMB_PERIOD, DIFF_MAX, DIFF_MIN,
    GENESIS_PREVIOUS_PROOF,
};
use crate::crypto::{Hash256, digest};
use crate::error::{ChainError, Result, TransactionError};
use crate::transaction::{Amount, Transaction, TxOutput};

/// A single block in the chain.
///
/// `proof` is the proof-of-work digest found by the miner over
/// `previous_proof ‖ commitment ‖ timestamp ‖ nonce`. It stays empty until
/// the block is sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "BlockRecord")]
pub struct Block {
    pub index: u64,
    pub previous_proof: String,
    pub timestamp: i64, // Unix timestamp (UTC, milliseconds)
    pub nonce: u64,
    pub difficulty: u32,
    pub commitment: String,
    pub transactions: Vec<Transaction>,
    pub proof: String,
    #[serde(skip)]
    tree: CommitmentTree,
}

/// Wire/persistence form; the commitment tree is rebuilt on load.
#[derive(Deserialize)]
struct BlockRecord {
    index: u64,
    previous_proof: String,
    timestamp: i64,
    nonce: u64,
    difficulty: u32,
    commitment: String,
    transactions: Vec<Transaction>,
    proof: String,
}

impl TryFrom<BlockRecord> for Block {
    type Error = ChainError;

    fn try_from(r: BlockRecord) -> Result<Self> {
        let mut tree = CommitmentTree::new();
        for tx in &r.transactions {
            tree.add_leaf(&tx.id()?, &leaf_bytes(tx)?);
        }
        tree.finalize();
        Ok(Self {
            index: r.index,
            previous_proof: r.previous_proof,
            timestamp: r.timestamp,
            nonce: r.nonce,
            difficulty: r.difficulty,
            commitment: r.commitment,
            transactions: r.transactions,
            proof: r.proof,
            tree,
        })
    }
}

/// Header fields covered by [`Block::hash`], in canonical order.
#[derive(Serialize)]
struct Header<'a> {
    index: u64,
    previous_proof: &'a str,
    commitment: &'a str,
    timestamp: i64,
    nonce: u64,
    difficulty: u32,
}

fn leaf_bytes(tx: &Transaction) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(tx)?)
}

impl Block {
    /// Create an unsealed block with an empty transaction set.
    pub fn new(index: u64, previous_proof: String, difficulty: u32) -> Self {
        Self::new_with_timestamp(index, previous_proof, difficulty, Utc::now().timestamp_millis())
    }

    pub fn new_with_timestamp(
        index: u64,
        previous_proof: String,
        difficulty: u32,
        timestamp: i64,
    ) -> Self {
        Self {
            index,
            previous_proof,
            timestamp,
            nonce: 0,
            difficulty: difficulty.clamp(DIFF_MIN, DIFF_MAX),
            commitment: String::new(),
            transactions: Vec::new(),
            proof: String::new(),
            tree: CommitmentTree::new(),
        }
    }

    /// Unsealed genesis block (index 0, sentinel previous proof).
    pub fn genesis(difficulty: u32, timestamp: i64) -> Self {
        Self::new_with_timestamp(0, GENESIS_PREVIOUS_PROOF.to_string(), difficulty, timestamp)
    }

    /// Append a transaction, hashing it first if needed. The commitment is
    /// recomputed on the next [`Block::finalize_commitment`].
    pub fn add_transaction(&mut self, mut tx: Transaction) -> Result<()> {
        let id = match tx.proof.clone() {
            Some(p) => p,
            None => tx.hash()?,
        };
        if self.tree.contains(&id) {
            return Err(TransactionError::Duplicate(id).into());
        }
        self.tree.add_leaf(&id, &leaf_bytes(&tx)?);
        self.transactions.push(tx);
        self.commitment.clear();
        Ok(())
    }

    pub fn finalize_commitment(&mut self) -> String {
        self.commitment = self.tree.finalize().to_hex();
        self.commitment.clone()
    }

    pub fn is_commitment_ready(&self) -> bool {
        self.tree.is_ready() && !self.commitment.is_empty()
    }

    /// Root recomputed from the transaction set, regardless of the stored
    /// `commitment` value.
    pub fn computed_commitment(&self) -> Result<String> {
        Ok(self.tree.root()?.to_hex())
    }

    /// Digest of the header fields (never the proof itself). The result is
    /// stored as the proof only while the block is unsealed; a sealed
    /// block keeps its proof of work.
    pub fn hash(&mut self) -> Result<String> {
        let header = self.header_hash()?;
        if !self.is_sealed() {
            self.proof = header.clone();
        }
        Ok(header)
    }

    pub fn header_hash(&self) -> Result<String> {
        if !self.is_commitment_ready() {
            return Err(ChainError::NotReady("block header"));
        }
        let header = Header {
            index: self.index,
            previous_proof: &self.previous_proof,
            commitment: &self.commitment,
            timestamp: self.timestamp,
            nonce: self.nonce,
            difficulty: self.difficulty,
        };
        Ok(digest(&serde_json::to_vec(&header)?).to_hex())
    }

    /// Mining preimage prefix: `previous_proof ‖ commitment ‖ timestamp`.
    pub fn pow_prefix(&self) -> Result<Vec<u8>> {
        if !self.is_commitment_ready() {
            return Err(ChainError::NotReady("commitment digest"));
        }
        Ok(format!("{}{}{}", self.previous_proof, self.commitment, self.timestamp).into_bytes())
    }

    pub fn pow_digest(&self, nonce: u64) -> Result<Hash256> {
        let mut guess = self.pow_prefix()?;
        guess.extend_from_slice(nonce.to_string().as_bytes());
        Ok(digest(&guess))
    }

    /// Record a mining result.
    pub fn seal(&mut self, nonce: u64, proof: String) {
        self.nonce = nonce;
        self.proof = proof;
    }

    /// Whether `proof` is the proof-of-work digest for the stored nonce.
    pub fn is_sealed(&self) -> bool {
        !self.proof.is_empty()
            && self
                .pow_digest(self.nonce)
                .is_ok_and(|h| h.to_hex() == self.proof)
    }

    /// Recompute the proof-of-work digest and check it against the stored
    /// proof and the block's difficulty. (Does NOT check chain linkage.)
    pub fn verify_proof(&self) -> bool {
        match self.pow_digest(self.nonce) {
            Ok(h) => h.to_hex() == self.proof && h.meets_difficulty(self.difficulty),
            Err(_) => false,
        }
    }

    /// Bitcoin-style retarget with an escalating "difficulty bomb":
    /// `previous ± previous / 2048 + 2^(index / period - free_periods)`.
    /// Raises difficulty when the gap to `previous` is under ten seconds.
    pub fn calculate_difficulty(&self, previous: &Block) -> u32 {
        let offset = i64::from(previous.difficulty / 2048);
        let time_diff_secs = (self.timestamp - previous.timestamp) / 1000;
        let sign = if time_diff_secs < BOMB_FAST_THRESHOLD_SECS {
            1
        } else {
            -1
        };

        let exponent = (self.index / BOMB_PERIOD) as i64 - BOMB_FREE_PERIODS;
        let bomb: i64 = match exponent {
            e if e < 0 => 0,
            e if e < 62 => 1i64 << e,
            _ => i64::MAX,
        };

        let next = i64::from(previous.difficulty)
            .saturating_add(offset * sign)
            .saturating_add(bomb);
        next.clamp(i64::from(DIFF_MIN), i64::from(DIFF_MAX)) as u32
    }

    /// Transaction whose proof is `tx_hash`, via the commitment index.
    pub fn lookup_transaction(&self, tx_hash: &str) -> Option<&Transaction> {
        self.tree
            .lookup(tx_hash)
            .and_then(|pos| self.transactions.get(pos))
    }

    pub fn fetch_output(&self, tx_hash: &str, output_index: u32) -> Result<&TxOutput> {
        self.lookup_transaction(tx_hash)
            .and_then(|tx| tx.outputs.get(output_index as usize))
            .ok_or_else(|| ChainError::OutputNotFound {
                tx_hash: tx_hash.to_string(),
                output_index,
            })
    }

    pub fn fetch_output_amount(&self, tx_hash: &str, output_index: u32) -> Result<Amount> {
        self.fetch_output(tx_hash, output_index).map(|o| o.amount)
    }

    /// Whether any transaction in this block spends the given output.
    pub fn spends(&self, tx_hash: &str, output_index: u32) -> bool {
        self.transactions.iter().any(|tx| {
            tx.inputs
                .iter()
                .any(|i| i.tx_hash == tx_hash && i.output_index == output_index)
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mining::MiningEngine;
    use crate::transaction::{TxInput, TxOutput};
    use crate::wallet::KeyPair;

    fn tx(seed: u32) -> Transaction {
        let mut tx = Transaction::with_timestamp(
            u64::from(seed),
            vec![TxInput {
                tx_hash: "demo-txid".into(),
                output_index: seed,
            }],
            vec![TxOutput {
                recipient: KeyPair::generate().address(),
                amount: Amount::from_coins(u64::from(seed) + 1).unwrap(),
            }],
            Amount::ZERO,
            1_700_000_000_000,
        );
        tx.hash().unwrap();
        tx
    }

    fn sealed_block() -> Block {
        let mut b = Block::new_with_timestamp(1, "prev".into(), 2, 1_700_000_000_000);
        b.add_transaction(tx(1)).unwrap();
        b.finalize_commitment();
        let found = MiningEngine::default().mine_sequential(&b).unwrap();
        b.seal(found.nonce, found.proof);
        b
    }

    #[test]
    fn duplicate_transactions_are_rejected() {
        let mut b = Block::new(1, "prev".into(), 1);
        let t = tx(1);
        b.add_transaction(t.clone()).unwrap();
        assert!(matches!(
            b.add_transaction(t),
            Err(ChainError::InvalidTransaction(TransactionError::Duplicate(_)))
        ));
        assert_eq!(b.transactions.len(), 1);
    }

    #[test]
    fn adding_a_transaction_invalidates_the_commitment() {
        let mut b = Block::new(1, "prev".into(), 1);
        b.add_transaction(tx(1)).unwrap();
        let first = b.finalize_commitment();
        assert!(b.is_commitment_ready());

        b.add_transaction(tx(2)).unwrap();
        assert!(!b.is_commitment_ready());
        assert!(matches!(b.header_hash(), Err(ChainError::NotReady(_))));
        assert!(matches!(b.pow_prefix(), Err(ChainError::NotReady(_))));

        assert_ne!(b.finalize_commitment(), first);
    }

    #[test]
    fn header_hash_excludes_proof() {
        let mut b = Block::new(3, "prev".into(), 1);
        b.finalize_commitment();
        let h1 = b.hash().unwrap();
        assert_eq!(b.proof, h1);
        b.proof = "something else".into();
        assert_eq!(b.header_hash().unwrap(), h1);

        b.nonce += 1;
        assert_ne!(b.header_hash().unwrap(), h1);
    }

    #[test]
    fn hash_keeps_the_proof_of_a_sealed_block() {
        let mut b = sealed_block();
        let pow = b.proof.clone();
        assert!(b.is_sealed());

        let header = b.hash().unwrap();
        assert_ne!(header, pow);
        assert_eq!(b.proof, pow);
        assert!(b.verify_proof());
        assert_eq!(b.hash().unwrap(), header);
    }

    #[test]
    fn header_hash_alone_does_not_seal() {
        let mut b = Block::new(2, "prev".into(), 1);
        b.finalize_commitment();
        assert!(!b.is_sealed());
        b.hash().unwrap();
        assert!(!b.is_sealed());

        // Rehashing an unsealed block refreshes the stored header digest.
        b.nonce += 1;
        let refreshed = b.hash().unwrap();
        assert_eq!(b.proof, refreshed);
    }

    #[test]
    fn json_with_unparseable_fields_is_rejected() {
        let json = sealed_block().to_json().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["transactions"][0]["fee"] = serde_json::Value::from("not-a-number");
        assert!(matches!(
            Block::from_json(&value.to_string()),
            Err(ChainError::Serialization(_))
        ));
    }

    #[test]
    fn mining_produces_leading_zeros() {
        let b = sealed_block();
        assert!(b.proof.starts_with("00"));
        assert!(b.verify_proof());
    }

    #[test]
    fn invalid_when_mutated() {
        let mut b = sealed_block();
        assert!(b.verify_proof());

        // Mutate: add a new tx (tampering)
        b.add_transaction(tx(7)).unwrap();
        b.finalize_commitment();
        assert!(!b.verify_proof());
    }

    #[test]
    fn fetch_output_amount_uses_commitment_index() {
        let mut b = Block::new(1, "prev".into(), 1);
        let t = tx(4);
        let id = t.proof.clone().unwrap();
        b.add_transaction(t).unwrap();

        assert_eq!(
            b.fetch_output_amount(&id, 0).unwrap(),
            Amount::from_coins(5).unwrap()
        );
        assert!(matches!(
            b.fetch_output_amount(&id, 1),
            Err(ChainError::OutputNotFound { .. })
        ));
        assert!(matches!(
            b.fetch_output_amount("missing", 0),
            Err(ChainError::OutputNotFound { .. })
        ));
        assert!(b.spends("demo-txid", 4));
        assert!(!b.spends("demo-txid", 5));
    }

    #[test]
    fn json_roundtrip_rebuilds_commitment() {
        let b = sealed_block();
        let back = Block::from_json(&b.to_json().unwrap()).unwrap();
        assert_eq!(back.proof, b.proof);
        assert_eq!(back.computed_commitment().unwrap(), b.commitment);
        assert!(back.verify_proof());
        assert!(back.lookup_transaction(&b.transactions[0].id().unwrap()).is_some());
    }

    #[test]
    fn bomb_difficulty_follows_block_spacing() {
        let prev = Block::new_with_timestamp(10, "p".into(), 5, 1_000_000);

        let fast = Block::new_with_timestamp(11, "p".into(), 5, 1_000_000 + 2_000);
        let slow = Block::new_with_timestamp(11, "p".into(), 5, 1_000_000 + 60_000);
        // offset is previous / 2048 == 0 at these difficulties, and the bomb
        // has not started yet.
        assert_eq!(fast.calculate_difficulty(&prev), 5);
        assert_eq!(slow.calculate_difficulty(&prev), 5);

        // Third bomb period: 2^(3 - 2) = 2 added.
        let late = Block::new_with_timestamp(3 * BOMB_PERIOD, "p".into(), 5, 1_000_000 + 2_000);
        assert_eq!(late.calculate_difficulty(&prev), 7);

        let very_late =
            Block::new_with_timestamp(80 * BOMB_PERIOD, "p".into(), 5, 1_000_000 + 2_000);
        assert_eq!(very_late.calculate_difficulty(&prev), DIFF_MAX);
    }
}
