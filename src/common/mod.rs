mod error;
pub use error::*;

mod config;
pub use config::{DatabaseConfig, ReplacementStrategy, VictimStrategyKind};

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fixed-size block of a data file: file name plus 0-based block number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockID {
    pub file_name: String,
    pub number: u32,
}

impl BlockID {
    pub fn new(file_name: impl Into<String>, number: u32) -> Self {
        Self {
            file_name: file_name.into(),
            number,
        }
    }
}

impl fmt::Display for BlockID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.file_name, self.number)
    }
}

// Byte offset of a record's length prefix in the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LSN(pub u64);

impl fmt::Display for LSN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionID(pub u32);

impl TransactionID {
    /// Written as the transaction field of records that belong to no transaction.
    pub const NONE: TransactionID = TransactionID(0);

    pub fn next(self) -> TransactionID {
        TransactionID(self.0 + 1)
    }
}

impl fmt::Display for TransactionID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tx{}", self.0)
    }
}
