use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DbError, Result};
use crate::lock::IsolationLevel;

/// Which frame the buffer pool gives up when it needs room for a new block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementStrategy {
    FirstFit,
    Lru,
    Clock,
}

/// Which transaction of a deadlock cycle gets aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VictimStrategyKind {
    /// Highest transaction id, i.e. the one that has done the least work.
    Youngest,
    Oldest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub db_directory: PathBuf,
    pub block_size: usize,
    pub buffer_pool_size: usize,
    pub replacement: ReplacementStrategy,
    pub pin_timeout: Duration,
    pub lock_timeout: Duration,
    pub deadlock_detection: bool,
    pub deadlock_detection_interval: Duration,
    pub victim_strategy: VictimStrategyKind,
    pub default_isolation: IsolationLevel,
    // None disables the background checkpointer.
    pub checkpoint_interval: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_directory: PathBuf::from("minidb-data"),
            block_size: 400,
            buffer_pool_size: 8,
            replacement: ReplacementStrategy::FirstFit,
            pin_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(10),
            deadlock_detection: true,
            deadlock_detection_interval: Duration::from_secs(1),
            victim_strategy: VictimStrategyKind::Youngest,
            default_isolation: IsolationLevel::ReadCommitted,
            checkpoint_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl DatabaseConfig {
    pub fn new(db_directory: impl AsRef<Path>) -> Self {
        Self {
            db_directory: db_directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    pub fn with_replacement(mut self, replacement: ReplacementStrategy) -> Self {
        self.replacement = replacement;
        self
    }

    pub fn with_pin_timeout(mut self, timeout: Duration) -> Self {
        self.pin_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_deadlock_detection(mut self, enabled: bool, interval: Duration) -> Self {
        self.deadlock_detection = enabled;
        self.deadlock_detection_interval = interval;
        self
    }

    pub fn with_victim_strategy(mut self, strategy: VictimStrategyKind) -> Self {
        self.victim_strategy = strategy;
        self
    }

    pub fn with_default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Option<Duration>) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        // A block must at least hold one i32 (or an empty string's length prefix)
        if self.block_size < 4 {
            return Err(DbError::InvalidConfig(format!(
                "block size must be at least 4 bytes, got {}",
                self.block_size
            )));
        }
        if self.buffer_pool_size == 0 {
            return Err(DbError::InvalidConfig(
                "buffer pool needs at least one frame".to_string(),
            ));
        }
        if self.deadlock_detection && self.deadlock_detection_interval.is_zero() {
            return Err(DbError::InvalidConfig(
                "deadlock detection interval must be non-zero".to_string(),
            ));
        }
        if matches!(self.checkpoint_interval, Some(interval) if interval.is_zero()) {
            return Err(DbError::InvalidConfig(
                "checkpoint interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
