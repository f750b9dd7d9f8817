use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;

use crate::common::{BlockID, DbError, Result, TransactionID};
use crate::lock::{Lock, LockMode, WaitForGraph};

/// All block locks of a database. One instance is shared by every
/// transaction; entries are created on first use and never removed, so two
/// requesters of the same block always meet on the same `Lock`.
pub struct LockTable {
    locks: Mutex<HashMap<BlockID, Arc<Lock>>>,
    timeout: Duration,
    wait_for: Arc<WaitForGraph>,
    victims: Mutex<HashSet<TransactionID>>,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
            wait_for: Arc::new(WaitForGraph::new()),
            victims: Mutex::new(HashSet::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn wait_for_graph(&self) -> &Arc<WaitForGraph> {
        &self.wait_for
    }

    pub fn s_lock(&self, block: &BlockID, tx: TransactionID) -> Result<()> {
        self.acquire(block, tx, LockMode::Shared)
    }

    pub fn x_lock(&self, block: &BlockID, tx: TransactionID) -> Result<()> {
        self.acquire(block, tx, LockMode::Exclusive)
    }

    fn acquire(&self, block: &BlockID, tx: TransactionID, mode: LockMode) -> Result<()> {
        let lock = self.get_lock(block);
        lock.acquire(tx, mode, self.timeout, &self.wait_for, &|t| self.is_victim(t))
            .map_err(|reason| DbError::LockAbort {
                tx,
                block: block.clone(),
                reason,
            })?;
        // A granted request no longer waits, so any pending victim mark is stale
        self.victims.lock().remove(&tx);
        debug!("{} holds {:?} lock on {}", tx, mode, block);
        Ok(())
    }

    /// Releases whatever `tx` holds on `block`. Returns false if it held nothing.
    pub fn unlock(&self, block: &BlockID, tx: TransactionID) -> bool {
        let lock = self.locks.lock().get(block).cloned();
        lock.map_or(false, |lock| lock.release(tx))
    }

    /// Marks `tx` as a deadlock victim and wakes every lock waiter, so that
    /// `tx` gives up its wait with `AbortReason::Deadlock`. `running` is asked
    /// under the victim set's mutex, which `forget` also takes, so a
    /// transaction that already finished is never marked. Returns whether
    /// `tx` was marked.
    pub fn abort_waiter(&self, tx: TransactionID, running: impl FnOnce(TransactionID) -> bool) -> bool {
        {
            let mut victims = self.victims.lock();
            if !running(tx) {
                return false;
            }
            victims.insert(tx);
        }
        info!("{} marked as deadlock victim", tx);
        let locks: Vec<Arc<Lock>> = self.locks.lock().values().cloned().collect();
        for lock in locks {
            lock.wake_all();
        }
        true
    }

    pub fn is_victim(&self, tx: TransactionID) -> bool {
        self.victims.lock().contains(&tx)
    }

    /// Forgets victim state and wait-for edges of a finished transaction.
    pub fn forget(&self, tx: TransactionID) {
        self.victims.lock().remove(&tx);
        self.wait_for.remove_transaction(tx);
    }

    pub fn mode_of(&self, block: &BlockID, tx: TransactionID) -> Option<LockMode> {
        let lock = self.locks.lock().get(block).cloned();
        lock.and_then(|lock| lock.mode_held_by(tx))
    }

    pub fn is_locked(&self, block: &BlockID) -> bool {
        let lock = self.locks.lock().get(block).cloned();
        lock.map_or(false, |lock| {
            lock.exclusive_holder().is_some() || !lock.shared_holders().is_empty()
        })
    }

    /// Number of blocks that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    fn get_lock(&self, block: &BlockID) -> Arc<Lock> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(block.clone())
                .or_insert_with(|| Arc::new(Lock::new(block.clone()))),
        )
    }
}
