use futures::future::join_all;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::timeout;

use super::peer::PeerTransport;
use crate::blockchain::{Block, Blockchain};
use crate::error::{ChainError, Result};

/// Winning proof at one height and the peers that reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Majority {
    pub proof: String,
    /// Peer positions, in peer order.
    pub members: Vec<usize>,
    pub responders: usize,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub local_height: u64,
    pub network_height: u64,
    pub applied: u64,
}

/// Group `(peer, proof)` responses by proof and pick the largest group.
/// Ties go to the lexicographically smallest proof. No responses, or two
/// or more responders that all disagree, is a divergence.
pub fn tally(responses: &[(usize, String)]) -> Result<Majority> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (peer, proof) in responses {
        groups.entry(proof.as_str()).or_default().push(*peer);
    }

    let mut best: Option<(&str, &Vec<usize>)> = None;
    for (proof, members) in &groups {
        match best {
            Some((_, m)) if m.len() >= members.len() => {}
            _ => best = Some((proof, members)),
        }
    }

    let Some((proof, members)) = best else {
        return Err(ChainError::ConsensusDivergence("no peer responded".into()));
    };
    if responses.len() >= 2 && members.len() == 1 {
        return Err(ChainError::ConsensusDivergence(format!(
            "{} peers reported {} different proofs",
            responses.len(),
            groups.len()
        )));
    }
    Ok(Majority {
        proof: proof.to_string(),
        members: members.clone(),
        responders: responses.len(),
    })
}

/// Pulls missing blocks from peers, height by height, accepting at each
/// height the block carrying the majority proof.
pub struct ConsensusSync {
    peers: Vec<Arc<dyn PeerTransport>>,
    timeout: Duration,
}

impl ConsensusSync {
    pub fn new(peers: Vec<Arc<dyn PeerTransport>>, timeout: Duration) -> Self {
        Self { peers, timeout }
    }

    pub fn peers(&self) -> &[Arc<dyn PeerTransport>] {
        &self.peers
    }

    /// Bring `chain` up to the network height. The chain lock is never held
    /// across a peer request.
    pub async fn sync(&self, chain: &Mutex<Blockchain>) -> Result<SyncReport> {
        let local_height = lock(chain).height();
        let network_height = self.network_height().await?;
        let mut report = SyncReport {
            local_height,
            network_height,
            applied: 0,
        };
        if network_height <= local_height {
            debug!("in sync at height {local_height} (network {network_height})");
            return Ok(report);
        }

        info!("syncing heights {}..={}", local_height + 1, network_height);
        for height in (local_height + 1)..=network_height {
            if let Err(e) = self.sync_height(chain, height).await {
                error!("sync stopped at height {}: {}", height, e);
                return Err(e);
            }
            report.applied += 1;
        }
        info!("synced {} block(s), now at height {}", report.applied, network_height);
        Ok(report)
    }

    /// Height reported by a randomly chosen peer; the others are tried in
    /// turn if it does not answer.
    pub async fn network_height(&self) -> Result<u64> {
        for i in self.random_order() {
            let peer = &self.peers[i];
            match timeout(self.timeout, peer.get_height()).await {
                Ok(Ok(height)) => {
                    debug!("peer {} reports height {}", peer.id(), height);
                    return Ok(height);
                }
                Ok(Err(e)) => warn!("peer {} height query failed: {}", peer.id(), e),
                Err(_) => warn!("peer {} timed out on height query", peer.id()),
            }
        }
        Err(ChainError::ConsensusDivergence(
            "no peer reported a height".into(),
        ))
    }

    /// Ask every peer for its proof at `height` in parallel. Peers that fail
    /// or miss the timeout are left out.
    pub async fn query_proofs(&self, height: u64) -> Vec<(usize, String)> {
        let limit = self.timeout;
        let requests = self.peers.iter().enumerate().map(|(i, peer)| async move {
            (i, timeout(limit, peer.get_proof(height)).await)
        });

        let mut responses = Vec::with_capacity(self.peers.len());
        for (i, outcome) in join_all(requests).await {
            let id = self.peers[i].id();
            match outcome {
                Ok(Ok(proof)) => responses.push((i, proof)),
                Ok(Err(e)) => warn!("peer {id} excluded at height {height}: {e}"),
                Err(_) => warn!("peer {id} excluded at height {height}: timed out"),
            }
        }
        responses
    }

    /// QueryProofs, tally, fetch from a majority member, then `add_block`.
    pub async fn sync_height(&self, chain: &Mutex<Blockchain>, height: u64) -> Result<()> {
        let responses = self.query_proofs(height).await;
        let majority = tally(&responses)?;
        info!(
            "height {}: proof {} backed by {}/{} responders",
            height,
            majority.proof,
            majority.members.len(),
            majority.responders
        );

        let block = self.fetch_block(height, &majority).await?;
        lock(chain).add_block(block).map(|_| ())
    }

    async fn fetch_block(&self, height: u64, majority: &Majority) -> Result<Block> {
        for &i in &majority.members {
            let peer = &self.peers[i];
            match timeout(self.timeout, peer.get_block(height)).await {
                Ok(Ok(block)) if block.index == height && block.proof == majority.proof => {
                    return Ok(block);
                }
                Ok(Ok(block)) => warn!(
                    "peer {} served block #{} with proof {}, expected {}",
                    peer.id(),
                    block.index,
                    block.proof,
                    majority.proof
                ),
                Ok(Err(e)) => warn!("peer {} failed to serve block {}: {}", peer.id(), height, e),
                Err(_) => warn!("peer {} timed out serving block {}", peer.id(), height),
            }
        }
        Err(ChainError::ConsensusDivergence(format!(
            "no majority peer served block {height}"
        )))
    }

    fn random_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.peers.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        order
    }
}

fn lock(chain: &Mutex<Blockchain>) -> MutexGuard<'_, Blockchain> {
    chain.lock().unwrap_or_else(PoisonError::into_inner)
}
