//! Chain parameters and node settings.

use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::blockchain::{DEFAULT_MINING_WORKERS, EmaParams, INITIAL_DIFFICULTY, StrategyKind};
use crate::transaction::Amount;
use crate::wallet;

/// Output paid by the genesis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: String,
    pub amount: Amount,
}

/// Consensus-relevant parameters. Nodes that want to sync with each other
/// must agree on everything except `mining_workers` and `nonce_space`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainParams {
    pub initial_difficulty: u32,
    pub strategy: StrategyKind,
    pub ema: EmaParams,
    pub mining_workers: usize,
    /// Upper bound of the nonce space split across workers.
    pub nonce_space: u64,
    pub genesis_allocation: Option<GenesisAllocation>,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            initial_difficulty: INITIAL_DIFFICULTY,
            strategy: StrategyKind::default(),
            ema: EmaParams::default(),
            mining_workers: DEFAULT_MINING_WORKERS,
            nonce_space: u64::MAX,
            genesis_allocation: None,
        }
    }
}

/// Settings of the HTTP node process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Base URLs of peer nodes, e.g. `http://10.0.0.2:8080`.
    pub peers: Vec<String>,
    pub peer_timeout: Duration,
    /// Zero disables background sync.
    pub sync_interval: Duration,
    pub chain: ChainParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            peers: Vec::new(),
            peer_timeout: Duration::from_millis(2_000),
            sync_interval: Duration::from_secs(30),
            chain: ChainParams::default(),
        }
    }
}

impl NodeConfig {
    /// Read settings from the process environment. Call `dotenvy::dotenv()`
    /// first to pick up a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults and
    /// malformed ones are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut chain = defaults.chain.clone();

        chain.mining_workers = parse_or(&lookup, "MINING_WORKERS", chain.mining_workers).max(1);
        chain.ema.target_interval_secs =
            parse_or(&lookup, "TARGET_BLOCK_TIME_SECS", chain.ema.target_interval_secs);
        if chain.ema.target_interval_secs <= 0.0 {
            warn!("TARGET_BLOCK_TIME_SECS must be positive, using default");
            chain.ema.target_interval_secs = defaults.chain.ema.target_interval_secs;
        }
        chain.ema.adjustment_interval = parse_or(
            &lookup,
            "DIFFICULTY_ADJUSTMENT_INTERVAL",
            chain.ema.adjustment_interval,
        )
        .max(1);
        chain.strategy = match lookup("DIFFICULTY_STRATEGY").as_deref() {
            None => chain.strategy,
            Some("ema") => StrategyKind::Ema,
            Some("bomb") => StrategyKind::Bomb,
            Some(other) => {
                warn!("unknown DIFFICULTY_STRATEGY {other:?}, using ema");
                StrategyKind::Ema
            }
        };
        chain.genesis_allocation = genesis_from(&lookup);

        let peers = lookup("PEERS")
            .map(|raw| {
                raw.split(',')
                    .map(|p| p.trim().trim_end_matches('/').to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            peers,
            peer_timeout: Duration::from_millis(parse_or(
                &lookup,
                "PEER_TIMEOUT_MS",
                defaults.peer_timeout.as_millis() as u64,
            )),
            sync_interval: Duration::from_secs(parse_or(
                &lookup,
                "SYNC_INTERVAL_SECS",
                defaults.sync_interval.as_secs(),
            )),
            chain,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("ignoring {key}={raw:?}: {e}");
            default
        }),
    }
}

fn genesis_from<F>(lookup: &F) -> Option<GenesisAllocation>
where
    F: Fn(&str) -> Option<String>,
{
    let address = lookup("GENESIS_ADDRESS")?.trim().to_lowercase();
    if !wallet::is_valid(&address) {
        warn!("GENESIS_ADDRESS is not a valid address, genesis pays nobody");
        return None;
    }
    let amount = match lookup("GENESIS_AMOUNT") {
        None => Amount::from_coins(1_000)?,
        Some(raw) => match raw.parse() {
            Ok(a) => a,
            Err(e) => {
                warn!("ignoring GENESIS_AMOUNT: {e}");
                return None;
            }
        },
    };
    Some(GenesisAllocation { address, amount })
}
