use log::{debug, info};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Instant;

use super::block::Block;
use crate::crypto::{self, Hash256};
use crate::error::{ChainError, Result};

/// Digest used for nonce guesses. Swappable so tests can stub it.
pub type DigestFn = fn(&[u8]) -> Hash256;

/// A winning nonce and the hex digest it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningResult {
    pub nonce: u64,
    pub proof: String,
}

/// Proof-of-work search over the nonce space, sequential or split across
/// scoped worker threads.
///
/// Workers share exactly one thing: the cancellation flag. Results flow
/// back through a bounded channel and the first one received wins; only
/// the caller touches the block afterwards.
#[derive(Debug, Clone)]
pub struct MiningEngine {
    space_upper_bound: u64,
    digest: DigestFn,
    cancel: Arc<AtomicBool>,
}

impl Default for MiningEngine {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl MiningEngine {
    /// Engine searching nonces in `[0, space_upper_bound)` when concurrent.
    pub fn new(space_upper_bound: u64) -> Self {
        Self {
            space_upper_bound,
            digest: crypto::digest,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_digest(mut self, digest: DigestFn) -> Self {
        self.digest = digest;
        self
    }

    pub fn space_upper_bound(&self) -> u64 {
        self.space_upper_bound
    }

    /// Ask running workers to stop. Best effort: a worker may test a few
    /// more nonces before it notices.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Try nonce 0, 1, 2, ... until the digest meets the block difficulty.
    /// Stops early with [`ChainError::MiningCancelled`] on [`MiningEngine::cancel`].
    pub fn mine_sequential(&self, block: &Block) -> Result<MiningResult> {
        let prefix = block.pow_prefix()?;
        let started = Instant::now();
        let mut buf = prefix.clone();

        self.cancel.store(false, Ordering::Release);
        for nonce in 0..=u64::MAX {
            if self.cancel.load(Ordering::Acquire) {
                return Err(ChainError::MiningCancelled(block.index));
            }
            if let Some(hash) =
                check_nonce(&mut buf, prefix.len(), nonce, block.difficulty, self.digest)
            {
                debug!(
                    "block #{} sealed sequentially: nonce={} in {} ms",
                    block.index,
                    nonce,
                    started.elapsed().as_millis()
                );
                return Ok(MiningResult {
                    nonce,
                    proof: hash.to_hex(),
                });
            }
        }
        Err(ChainError::NonceSpaceExhausted {
            start: 0,
            end: u64::MAX,
            difficulty: block.difficulty,
        })
    }

    /// Split `[0, space_upper_bound)` into `worker_count` contiguous ranges
    /// and race one thread per range. Returns the first result received.
    pub fn mine_concurrent(&self, block: &Block, worker_count: usize) -> Result<MiningResult> {
        let prefix = block.pow_prefix()?;
        let difficulty = block.difficulty;
        let ranges = partition(0, self.space_upper_bound, worker_count.max(1));
        let started = Instant::now();

        self.cancel.store(false, Ordering::Release);
        let (tx, rx) = mpsc::sync_channel::<(usize, MiningResult)>(ranges.len());

        let (winner, cancelled) = thread::scope(|s| {
            for (worker, &(start, end)) in ranges.iter().enumerate() {
                let tx = tx.clone();
                let cancel = self.cancel.as_ref();
                let prefix = prefix.as_slice();
                let digest = self.digest;

                s.spawn(move || {
                    let mut buf = prefix.to_vec();
                    for nonce in start..end {
                        if cancel.load(Ordering::Acquire) {
                            return;
                        }
                        if let Some(hash) =
                            check_nonce(&mut buf, prefix.len(), nonce, difficulty, digest)
                        {
                            cancel.store(true, Ordering::Release);
                            let result = MiningResult {
                                nonce,
                                proof: hash.to_hex(),
                            };
                            // Capacity equals the worker count, so this never blocks.
                            let _ = tx.try_send((worker, result));
                            return;
                        }
                    }
                });
            }
            drop(tx);

            let first = rx.recv().ok();
            let cancelled = first.is_none() && self.cancel.load(Ordering::Acquire);
            self.cancel.store(true, Ordering::Release);
            (first, cancelled)
        });

        match winner {
            Some((worker, result)) => {
                info!(
                    "worker {} found nonce {} for block #{} ({} workers, {} ms)",
                    worker,
                    result.nonce,
                    block.index,
                    ranges.len(),
                    started.elapsed().as_millis()
                );
                Ok(result)
            }
            None if cancelled => Err(ChainError::MiningCancelled(block.index)),
            None => Err(ChainError::NonceSpaceExhausted {
                start: 0,
                end: self.space_upper_bound,
                difficulty,
            }),
        }
    }
}

/// Split `[start, end)` into `parts` contiguous ranges of equal size; the
/// last one may be shorter. Empty ranges are dropped.
pub fn partition(start: u64, end: u64, parts: usize) -> Vec<(u64, u64)> {
    if start >= end || parts == 0 {
        return Vec::new();
    }
    let span = end - start;
    let step = span.div_ceil(parts as u64);

    (0..parts as u64)
        .map(|i| {
            let lo = start.saturating_add(i.saturating_mul(step));
            let hi = lo.saturating_add(step).min(end);
            (lo.min(end), hi)
        })
        .filter(|(lo, hi)| lo < hi)
        .collect()
}

fn check_nonce(
    buf: &mut Vec<u8>,
    prefix_len: usize,
    nonce: u64,
    difficulty: u32,
    digest: DigestFn,
) -> Option<Hash256> {
    buf.truncate(prefix_len);
    let _ = write!(buf, "{nonce}");
    let hash = digest(buf.as_slice());
    hash.meets_difficulty(difficulty).then_some(hash)
}
