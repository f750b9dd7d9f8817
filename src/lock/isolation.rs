use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::DbError;

/// How much a transaction is shielded from concurrent ones. Writes always take
/// exclusive locks held to the end; the levels differ only in read locking.
///
/// | level            | read locks          | dirty | non-repeatable | phantom |
/// |------------------|---------------------|-------|----------------|---------|
/// | ReadUncommitted  | none                | yes   | yes            | yes     |
/// | ReadCommitted    | shared, released    | no    | yes            | yes     |
/// | RepeatableRead   | shared, held to end | no    | no             | yes     |
/// | Serializable     | as RepeatableRead   | no    | no             | yes*    |
///
/// *Serializable declares predicate locking, which this engine does not
/// implement; in practice it behaves as RepeatableRead and phantoms remain
/// possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::ReadCommitted
    }
}

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// 0 (weakest) to 3 (strongest).
    pub fn level(self) -> u8 {
        match self {
            IsolationLevel::ReadUncommitted => 0,
            IsolationLevel::ReadCommitted => 1,
            IsolationLevel::RepeatableRead => 2,
            IsolationLevel::Serializable => 3,
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    pub fn uses_read_locks(self) -> bool {
        self != IsolationLevel::ReadUncommitted
    }

    /// Whether read locks stay until commit/rollback.
    pub fn holds_read_locks(self) -> bool {
        self >= IsolationLevel::RepeatableRead
    }

    /// Declared by the level only; no predicate locks are taken.
    pub fn uses_predicate_locks(self) -> bool {
        self == IsolationLevel::Serializable
    }

    pub fn prevents_dirty_reads(self) -> bool {
        self.uses_read_locks()
    }

    pub fn prevents_non_repeatable_reads(self) -> bool {
        self.holds_read_locks()
    }

    /// Always false: phantoms need predicate or range locks, and only single
    /// blocks are ever locked.
    pub fn prevents_phantom_reads(self) -> bool {
        false
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for IsolationLevel {
    type Err = DbError;

    /// Accepts the SQL name in any case, with spaces or underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('_', " ").to_ascii_uppercase();
        IsolationLevel::ALL
            .into_iter()
            .find(|level| level.sql_name() == normalized)
            .ok_or_else(|| DbError::InvalidConfig(format!("unknown isolation level: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        let levels: Vec<u8> = IsolationLevel::ALL.iter().map(|l| l.level()).collect();
        assert_eq!(levels, vec![0, 1, 2, 3]);
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn read_locking_per_level() {
        use IsolationLevel::*;
        assert!(!ReadUncommitted.uses_read_locks());
        assert!(ReadCommitted.uses_read_locks() && !ReadCommitted.holds_read_locks());
        assert!(RepeatableRead.holds_read_locks() && !RepeatableRead.uses_predicate_locks());
        assert!(Serializable.uses_predicate_locks());

        assert!(!ReadUncommitted.prevents_dirty_reads());
        assert!(ReadCommitted.prevents_dirty_reads());
        assert!(!ReadCommitted.prevents_non_repeatable_reads());
        assert!(RepeatableRead.prevents_non_repeatable_reads());
        assert!(!RepeatableRead.prevents_phantom_reads());
        assert!(IsolationLevel::ALL.iter().all(|level| !level.prevents_phantom_reads()));
    }

    #[test]
    fn parses_sql_names() {
        assert_eq!("READ COMMITTED".parse::<IsolationLevel>().unwrap(), IsolationLevel::ReadCommitted);
        assert_eq!("repeatable read".parse::<IsolationLevel>().unwrap(), IsolationLevel::RepeatableRead);
        assert_eq!("READ_UNCOMMITTED".parse::<IsolationLevel>().unwrap(), IsolationLevel::ReadUncommitted);
        assert!("INVALID".parse::<IsolationLevel>().is_err());
        assert_eq!(IsolationLevel::Serializable.to_string(), "SERIALIZABLE");
    }
}
