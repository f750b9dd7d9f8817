use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::common::{BlockID, DbError, Result, TransactionID};
use crate::lock::{LockMode, LockTable};

/// The locks of one transaction. Locks only accumulate until `release_all`,
/// which runs once, at commit or rollback.
pub struct LockManager {
    tx: TransactionID,
    table: Arc<LockTable>,
    held: HashMap<BlockID, LockMode>,
    released: bool,
}

impl LockManager {
    pub fn new(tx: TransactionID, table: Arc<LockTable>) -> Self {
        Self {
            tx,
            table,
            held: HashMap::new(),
            released: false,
        }
    }

    pub fn transaction_id(&self) -> TransactionID {
        self.tx
    }

    pub fn s_lock(&mut self, block: &BlockID) -> Result<()> {
        self.ensure_active()?;
        if self.held.contains_key(block) {
            return Ok(());
        }
        self.table.s_lock(block, self.tx)?;
        self.held.insert(block.clone(), LockMode::Shared);
        Ok(())
    }

    pub fn x_lock(&mut self, block: &BlockID) -> Result<()> {
        self.ensure_active()?;
        if self.held.get(block) == Some(&LockMode::Exclusive) {
            return Ok(());
        }
        self.table.x_lock(block, self.tx)?;
        self.held.insert(block.clone(), LockMode::Exclusive);
        Ok(())
    }

    /// Gives up a shared lock before the transaction ends. Only READ_COMMITTED
    /// reads do this. An exclusive lock is kept until the end; the call then
    /// returns false.
    pub fn release_shared(&mut self, block: &BlockID) -> Result<bool> {
        match self.held.get(block) {
            Some(LockMode::Shared) => {
                self.table.unlock(block, self.tx);
                self.held.remove(block);
                Ok(true)
            }
            Some(LockMode::Exclusive) => Ok(false),
            None => Err(DbError::LockNotHeld {
                tx: self.tx,
                block: block.clone(),
            }),
        }
    }

    /// Releases every lock. Later calls do nothing and return 0.
    pub fn release_all(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;
        let count = self.held.len();
        for block in self.held.keys() {
            self.table.unlock(block, self.tx);
        }
        self.held.clear();
        self.table.forget(self.tx);
        debug!("{} released {} locks", self.tx, count);
        count
    }

    pub fn holds(&self, block: &BlockID) -> bool {
        self.held.contains_key(block)
    }

    pub fn mode_of(&self, block: &BlockID) -> Option<LockMode> {
        self.held.get(block).copied()
    }

    pub fn lock_count(&self) -> usize {
        self.held.len()
    }

    pub fn locked_blocks(&self) -> Vec<BlockID> {
        let mut blocks: Vec<BlockID> = self.held.keys().cloned().collect();
        blocks.sort();
        blocks
    }

    fn ensure_active(&self) -> Result<()> {
        if self.released {
            return Err(DbError::TransactionNotActive(self.tx));
        }
        Ok(())
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.release_all();
    }
}
