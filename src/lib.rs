//! A minimal proof-of-work chain: UTXO-style transactions, Merkle-committed
//! blocks, concurrent mining, adaptive difficulty and majority-proof sync.

pub mod blockchain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod transaction;
pub mod wallet;

pub use error::{ChainError, Result};
