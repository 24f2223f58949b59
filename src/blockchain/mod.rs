pub mod block;
pub mod commitment;
pub mod difficulty;
pub mod mining;
pub mod model;

pub use block::Block;
pub use commitment::CommitmentTree;
pub use difficulty::{BombRetarget, DifficultyStrategy, EmaController, EmaParams, StrategyKind};
pub use mining::{MiningEngine, MiningResult};
pub use model::{Blockchain, MiningJob};

/// Difficulty bounds (leading zero hex characters of the proof).
pub const DIFF_MIN: u32 = 1;
pub const DIFF_MAX: u32 = 64;

/// Difficulty of the genesis block and of a fresh controller.
pub const INITIAL_DIFFICULTY: u32 = 1;

/// `previous_proof` of the genesis block.
pub const GENESIS_PREVIOUS_PROOF: &str = "0";

/// Fixed genesis timestamp (ms) so independent nodes build the same genesis.
pub const GENESIS_TIMESTAMP_MS: i64 = 1_700_000_000_000;

/// How far ahead of the local clock a block timestamp may be (ms).
pub const MAX_FUTURE_DRIFT_MS: i64 = 2 * 60 * 60 * 1000;

/// Target seconds per block.
pub const TARGET_BLOCK_TIME_SECS: i64 = 60;

/// Retarget every this many blocks.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: usize = 10;

/// EMA smoothing factor bounds.
pub const EMA_MIN_ALPHA: f64 = 0.05;
pub const EMA_MAX_ALPHA: f64 = 0.5;

pub const EMA_SENSITIVITY: f64 = 0.5;
pub const EMA_SCALING_FACTOR: f64 = 0.5;

/// Largest difficulty step of a single retarget.
pub const MAX_ADJUSTMENT: f64 = 2.0;

/// Blocks per difficulty-bomb period.
pub const BOMB_PERIOD: u64 = 101_000;

/// Bomb periods before the bomb starts adding difficulty.
pub const BOMB_FREE_PERIODS: i64 = 2;

/// Block gaps under this many seconds push the bomb formula upward.
pub const BOMB_FAST_THRESHOLD_SECS: i64 = 10;

/// Default number of mining threads.
pub const DEFAULT_MINING_WORKERS: usize = 4;
