use log::warn;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use powchain::blockchain::{Block, Blockchain};
use powchain::config::NodeConfig;
use powchain::consensus::{ConsensusSync, HttpPeer, PeerTransport};

/// Shared application state: the chain (with its mempool), the peer set
/// and the node settings it was started with.
pub struct AppState {
    pub blockchain: Mutex<Blockchain>,
    pub sync: Option<ConsensusSync>,
    pub config: NodeConfig,
}

impl AppState {
    pub fn new(config: NodeConfig) -> powchain::Result<Self> {
        let blockchain = Blockchain::new(config.chain.clone())?;

        let peers: Vec<Arc<dyn PeerTransport>> = config
            .peers
            .iter()
            .filter_map(|url| match HttpPeer::new(url.as_str(), config.peer_timeout) {
                Ok(peer) => Some(Arc::new(peer) as Arc<dyn PeerTransport>),
                Err(e) => {
                    warn!("skipping peer {url}: {e}");
                    None
                }
            })
            .collect();
        let sync = (!peers.is_empty()).then(|| ConsensusSync::new(peers, config.peer_timeout));

        Ok(Self {
            blockchain: Mutex::new(blockchain),
            sync,
            config,
        })
    }
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize)]
pub struct ChainResponse<'a> {
    pub length: usize,
    pub height: u64,
    pub difficulty: u32,
    pub chain: &'a [Block],
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub length: usize,
    pub difficulty: u32,
}

#[derive(Serialize)]
pub struct MineResponse {
    pub mined_index: u64,
    pub proof: String,
    pub nonce: u64,
    pub difficulty: u32,
    pub transactions: usize,
}

#[derive(Serialize)]
pub struct DifficultyResponse {
    pub difficulty: u32,
    pub strategy: &'static str,
}

/* ---------- TX API Models ---------- */

#[derive(Serialize)]
pub struct NewTxResponse {
    pub tx_hash: String,
}

#[derive(Serialize)]
pub struct MempoolResponse {
    pub size: usize,
    pub transactions: Vec<String>, // list tx hashes for brevity
}

/* ---------- Peer API Models ---------- */

#[derive(Serialize)]
pub struct SyncResponse {
    pub local_height: u64,
    pub network_height: u64,
    pub applied: u64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub height: u64,
    pub length: usize,
    pub difficulty: u32,
    pub strategy: &'static str,
    pub target_block_time_secs: f64,
    pub adjustment_interval: usize,
    pub last_interval_secs: Option<f64>,
    pub avg_interval_secs: Option<f64>,
    pub mempool_size: usize,
    pub mining_workers: usize,
    /// Peers configured, and those that passed client setup.
    pub peers: usize,
    pub active_peers: usize,
    pub peer_timeout_ms: u64,
    pub sync_interval_secs: u64,
}
