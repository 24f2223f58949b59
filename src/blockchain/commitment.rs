use std::collections::HashMap;

use crate::crypto::{Hash256, digest};
use crate::error::{ChainError, Result};

/// Binary Merkle tree over a block's serialized transactions.
///
/// Leaves are digests of the serialized transactions. Odd levels duplicate
/// their last node. A key index (transaction proof to leaf position) gives
/// O(1) lookups.
#[derive(Debug, Clone, Default)]
pub struct CommitmentTree {
    leaves: Vec<Hash256>,
    index: HashMap<String, usize>,
    root: Option<Hash256>,
}

impl CommitmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf keyed by `key`. Returns the leaf position and marks
    /// the tree dirty.
    pub fn add_leaf(&mut self, key: &str, serialized_tx: &[u8]) -> usize {
        let position = self.leaves.len();
        self.leaves.push(digest(serialized_tx));
        self.index.insert(key.to_string(), position);
        self.root = None;
        position
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.root.is_some()
    }

    /// Build the tree bottom-up and cache the root.
    pub fn finalize(&mut self) -> Hash256 {
        let root = merkle_root(&self.leaves);
        self.root = Some(root);
        root
    }

    pub fn root(&self) -> Result<Hash256> {
        self.root.ok_or(ChainError::NotReady("commitment root"))
    }

    /// Leaf position of the transaction with proof `key`.
    pub fn lookup(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }
}

fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return digest(b"");
    }

    let mut level: Vec<Hash256> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(left.as_bytes());
                combined[32..].copy_from_slice(right.as_bytes());
                digest(&combined)
            })
            .collect();
    }
    level[0]
}
