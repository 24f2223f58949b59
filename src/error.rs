//! Error types for the chain core.

use thiserror::Error;

/// Failures while producing or checking a signature.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("key pair has no private half")]
    MissingPrivateKey,

    #[error("refusing to sign an empty payload")]
    EmptyPayload,

    #[error("signature verification failed: {0}")]
    Verification(String),
}

/// Reasons a transaction is rejected by the validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction must have at least one input")]
    NoInputs,

    #[error("transaction must have at least one output")]
    NoOutputs,

    #[error("transaction {0} is already in the block")]
    Duplicate(String),

    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("duplicate input {tx_hash}:{output_index}")]
    DuplicateInput { tx_hash: String, output_index: u32 },

    #[error("input {tx_hash}:{output_index} is already spent")]
    AlreadySpent { tx_hash: String, output_index: u32 },

    #[error("signer does not own output {tx_hash}:{output_index}")]
    NotOwner { tx_hash: String, output_index: u32 },

    #[error("referenced output {tx_hash}:{output_index} not found")]
    MissingOutput { tx_hash: String, output_index: u32 },

    #[error("inputs ({inputs}) must equal outputs ({outputs}) plus fee ({fee})")]
    Unbalanced {
        inputs: String,
        outputs: String,
        fee: String,
    },

    #[error("amount overflow while summing transaction values")]
    AmountOverflow,

    #[error("transaction is not signed")]
    Unsigned,

    #[error("stored proof does not match transaction content")]
    ProofMismatch,

    #[error("signature does not verify against the stored public key")]
    BadSignature,
}

/// Failures talking to a peer replica.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer {0} timed out")]
    Timeout(String),

    #[error("peer {peer} request failed: {reason}")]
    Request { peer: String, reason: String },

    #[error("peer {peer} has no block at height {height}")]
    NotFound { peer: String, height: u64 },
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("chain linkage broken at height {index}: expected previous proof {expected}, got {actual}")]
    ChainLinkage {
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("invalid block {index}: {reason}")]
    InvalidBlock { index: u64, reason: String },

    #[error("{0} requested before finalization")]
    NotReady(&'static str),

    #[error("output {tx_hash}:{output_index} not found on chain")]
    OutputNotFound { tx_hash: String, output_index: u32 },

    #[error("no nonce in [{start}, {end}) satisfies difficulty {difficulty}")]
    NonceSpaceExhausted { start: u64, end: u64, difficulty: u32 },

    #[error("mining of block {0} was cancelled")]
    MiningCancelled(u64),

    #[error("consensus divergence: {0}")]
    ConsensusDivergence(String),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;
