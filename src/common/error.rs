use thiserror::Error;

use super::{BlockID, TransactionID, LSN};

/// Why a lock wait was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Timeout,
    Deadlock,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Timeout => write!(f, "lock wait timed out"),
            AbortReason::Deadlock => write!(f, "chosen as deadlock victim"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Transaction {tx} aborted on {block}: {reason}")]
    LockAbort {
        tx: TransactionID,
        block: BlockID,
        reason: AbortReason,
    },

    #[error("Buffer full")]
    BufferPoolFull,

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Corrupt log record at {lsn}: {reason}")]
    CorruptLogRecord { lsn: LSN, reason: String },

    #[error("Transaction {tx} does not hold a lock on {block}")]
    LockNotHeld { tx: TransactionID, block: BlockID },

    #[error("Page access out of bounds: offset {offset} + {len} bytes exceeds block size {block_size}")]
    PageOverflow {
        offset: usize,
        len: usize,
        block_size: usize,
    },

    #[error("Transaction {0} is not active")]
    TransactionNotActive(TransactionID),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl DbError {
    pub fn is_lock_abort(&self) -> bool {
        matches!(self, DbError::LockAbort { .. })
    }

    /// Lock and I/O failures leave a transaction in an unknown state; it has to
    /// be rolled back. Contract violations are rejected before anything changes.
    pub fn requires_rollback(&self) -> bool {
        matches!(self, DbError::LockAbort { .. } | DbError::IOError(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
