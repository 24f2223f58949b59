use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::block::Block;
use super::{
    DIFF_MAX, DIFF_MIN, DIFFICULTY_ADJUSTMENT_INTERVAL, EMA_MAX_ALPHA, EMA_MIN_ALPHA,
    EMA_SCALING_FACTOR, EMA_SENSITIVITY, MAX_ADJUSTMENT, TARGET_BLOCK_TIME_SECS,
};

/// A retargeting rule. The chain feeds it every observed block interval
/// and asks it for the difficulty of the next block.
pub trait DifficultyStrategy: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Difficulty that applies to the next block.
    fn difficulty(&self) -> u32;

    /// Record the spacing (seconds) between the two newest blocks.
    fn observe(&mut self, interval_secs: f64);

    /// Called after a block is appended; `chain_len` counts the new block.
    fn retarget(&mut self, chain_len: usize, tip: &Block) -> u32;

    /// Difficulty required of `candidate`, built on top of `previous`.
    fn difficulty_for(&self, _candidate: &Block, _previous: &Block) -> u32 {
        self.difficulty()
    }
}

/// Tuning knobs for [`EmaController`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmaParams {
    pub target_interval_secs: f64,
    /// Retarget every this many blocks.
    pub adjustment_interval: usize,
    pub min_alpha: f64,
    pub max_alpha: f64,
    /// How strongly interval volatility raises the smoothing factor.
    pub sensitivity: f64,
    pub scaling_factor: f64,
    /// Largest difficulty change allowed by one retarget.
    pub max_adjustment: f64,
}

impl Default for EmaParams {
    fn default() -> Self {
        Self {
            target_interval_secs: TARGET_BLOCK_TIME_SECS as f64,
            adjustment_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            min_alpha: EMA_MIN_ALPHA,
            max_alpha: EMA_MAX_ALPHA,
            sensitivity: EMA_SENSITIVITY,
            scaling_factor: EMA_SCALING_FACTOR,
            max_adjustment: MAX_ADJUSTMENT,
        }
    }
}

/// Exponential-moving-average retargeting with an adaptive smoothing
/// factor. The default strategy.
#[derive(Debug, Clone)]
pub struct EmaController {
    params: EmaParams,
    difficulty: u32,
    ema: f64,
    alpha: f64,
    last_interval: Option<f64>,
}

impl EmaController {
    pub fn new(initial_difficulty: u32, params: EmaParams) -> Self {
        Self {
            params,
            difficulty: initial_difficulty.clamp(DIFF_MIN, DIFF_MAX),
            ema: params.target_interval_secs,
            alpha: params.min_alpha,
            last_interval: None,
        }
    }

    pub fn ema(&self) -> f64 {
        self.ema
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn params(&self) -> &EmaParams {
        &self.params
    }

    fn should_retarget(&self, chain_len: usize) -> bool {
        let interval = self.params.adjustment_interval.max(1);
        chain_len >= 2 && chain_len % interval == 0
    }

    /// Next difficulty from the current EMA. Blocks slower than target
    /// lower the difficulty, faster blocks raise it.
    fn next_difficulty(&self) -> u32 {
        let p = &self.params;
        let current = f64::from(self.difficulty);
        let deviation = (self.ema - p.target_interval_secs) / p.target_interval_secs;
        let adjustment = (deviation * p.scaling_factor).clamp(-p.max_adjustment, p.max_adjustment);

        let proposed = (current * (1.0 - adjustment))
            .clamp(current - p.max_adjustment, current + p.max_adjustment)
            .round();
        (proposed as i64).clamp(i64::from(DIFF_MIN), i64::from(DIFF_MAX)) as u32
    }
}

impl DifficultyStrategy for EmaController {
    fn name(&self) -> &'static str {
        "ema"
    }

    fn difficulty(&self) -> u32 {
        self.difficulty
    }

    fn observe(&mut self, interval_secs: f64) {
        let actual = interval_secs.max(0.0);
        let p = &self.params;
        self.alpha = match self.last_interval {
            Some(last) => {
                let change = (actual - last).abs() / p.target_interval_secs;
                (change * p.sensitivity).clamp(p.min_alpha, p.max_alpha)
            }
            None => p.min_alpha,
        };
        self.ema = self.alpha * actual + (1.0 - self.alpha) * self.ema;
        self.last_interval = Some(actual);
        debug!(
            "observed interval {:.3}s -> alpha={:.4} ema={:.3}s",
            actual, self.alpha, self.ema
        );
    }

    fn retarget(&mut self, chain_len: usize, _tip: &Block) -> u32 {
        if !self.should_retarget(chain_len) {
            return self.difficulty;
        }
        let next = self.next_difficulty();
        if next != self.difficulty {
            info!(
                "difficulty retarget at height {}: {} -> {} (ema={:.2}s target={:.2}s)",
                chain_len - 1,
                self.difficulty,
                next,
                self.ema,
                self.params.target_interval_secs
            );
        }
        self.difficulty = next;
        next
    }
}

/// Per-block retarget using [`Block::calculate_difficulty`]: a linear
/// offset plus the periodic difficulty bomb. Kept as an alternative to
/// [`EmaController`]; a chain uses one or the other, never both.
#[derive(Debug, Clone)]
pub struct BombRetarget {
    difficulty: u32,
}

impl BombRetarget {
    pub fn new(initial_difficulty: u32) -> Self {
        Self {
            difficulty: initial_difficulty.clamp(DIFF_MIN, DIFF_MAX),
        }
    }
}

impl DifficultyStrategy for BombRetarget {
    fn name(&self) -> &'static str {
        "bomb"
    }

    fn difficulty(&self) -> u32 {
        self.difficulty
    }

    fn observe(&mut self, _interval_secs: f64) {}

    fn retarget(&mut self, _chain_len: usize, tip: &Block) -> u32 {
        self.difficulty = tip.difficulty;
        self.difficulty
    }

    fn difficulty_for(&self, candidate: &Block, previous: &Block) -> u32 {
        candidate.calculate_difficulty(previous)
    }
}

/// Which strategy a chain runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Ema,
    Bomb,
}

impl StrategyKind {
    pub fn build(self, initial_difficulty: u32, ema: EmaParams) -> Box<dyn DifficultyStrategy> {
        match self {
            StrategyKind::Ema => Box::new(EmaController::new(initial_difficulty, ema)),
            StrategyKind::Bomb => Box::new(BombRetarget::new(initial_difficulty)),
        }
    }
}
