//! Shared/exclusive lock on a single block with a FIFO wait queue.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::{AbortReason, BlockID, TransactionID};
use crate::lock::WaitForGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Debug)]
struct LockRequest {
    tx: TransactionID,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockState {
    shared: HashSet<TransactionID>,
    exclusive: Option<TransactionID>,
    queue: VecDeque<LockRequest>,
}

impl LockState {
    fn holds(&self, tx: TransactionID, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.shared.contains(&tx) || self.exclusive == Some(tx),
            LockMode::Exclusive => self.exclusive == Some(tx),
        }
    }

    /// Requests queued before the one of `tx`.
    fn ahead_of(&self, tx: TransactionID) -> impl Iterator<Item = &LockRequest> {
        self.queue.iter().take_while(move |req| req.tx != tx)
    }

    fn can_grant(&self, tx: TransactionID, mode: LockMode) -> bool {
        match mode {
            // Shared requests may pass queued shared requests, never an
            // earlier exclusive one
            LockMode::Shared => {
                self.exclusive.is_none()
                    && self.ahead_of(tx).all(|req| req.mode == LockMode::Shared)
            }
            LockMode::Exclusive => {
                if self.exclusive.is_some() {
                    return false;
                }
                if self.shared.iter().any(|&holder| holder != tx) {
                    return false;
                }
                if self.shared.contains(&tx) {
                    // Sole shared holder upgrading: anything queued is waiting on us
                    return true;
                }
                matches!(self.queue.front(), Some(req) if req.tx == tx)
            }
        }
    }

    /// Transactions `tx` is currently waiting for: incompatible holders and
    /// incompatible requests queued ahead of it.
    fn blockers(&self, tx: TransactionID, mode: LockMode) -> BTreeSet<TransactionID> {
        let mut blockers = BTreeSet::new();
        if let Some(holder) = self.exclusive {
            blockers.insert(holder);
        }
        if mode == LockMode::Exclusive {
            blockers.extend(self.shared.iter().copied());
        }
        blockers.extend(
            self.ahead_of(tx)
                .filter(|req| !req.mode.is_compatible_with(mode))
                .map(|req| req.tx),
        );
        blockers.remove(&tx);
        blockers
    }

    fn grant(&mut self, tx: TransactionID, mode: LockMode) {
        self.remove_request(tx);
        match mode {
            LockMode::Shared => {
                self.shared.insert(tx);
            }
            LockMode::Exclusive => {
                self.shared.remove(&tx);
                self.exclusive = Some(tx);
            }
        }
    }

    fn remove_request(&mut self, tx: TransactionID) {
        if let Some(pos) = self.queue.iter().position(|req| req.tx == tx) {
            self.queue.remove(pos);
        }
    }
}

pub struct Lock {
    block: BlockID,
    state: Mutex<LockState>,
    waiters: Condvar,
}

impl Lock {
    pub fn new(block: BlockID) -> Self {
        Self {
            block,
            state: Mutex::new(LockState::default()),
            waiters: Condvar::new(),
        }
    }

    pub fn block(&self) -> &BlockID {
        &self.block
    }

    /// Blocks until `tx` holds the lock in `mode`, the timeout expires, or
    /// `is_victim` reports that the deadlock detector picked `tx`. While
    /// waiting, the edges from `tx` to the transactions it waits for are kept
    /// in `graph`.
    pub fn acquire(
        &self,
        tx: TransactionID,
        mode: LockMode,
        timeout: Duration,
        graph: &WaitForGraph,
        is_victim: &dyn Fn(TransactionID) -> bool,
    ) -> std::result::Result<(), AbortReason> {
        let mut state = self.state.lock();
        if state.holds(tx, mode) {
            return Ok(());
        }

        state.queue.push_back(LockRequest { tx, mode });
        let deadline = Instant::now() + timeout;
        let mut waited = false;

        let outcome = loop {
            if state.can_grant(tx, mode) {
                state.grant(tx, mode);
                break Ok(());
            }
            if is_victim(tx) {
                break Err(AbortReason::Deadlock);
            }
            if Instant::now() >= deadline {
                break Err(AbortReason::Timeout);
            }
            graph.set_waits_for(tx, state.blockers(tx, mode));
            waited = true;
            self.waiters.wait_until(&mut state, deadline);
        };

        if waited {
            graph.remove_waiter(tx);
        }
        match outcome {
            Ok(()) => {
                if waited {
                    debug!("{} granted {:?} lock on {} after waiting", tx, mode, self.block);
                }
            }
            Err(reason) => {
                state.remove_request(tx);
                warn!("{} gave up {:?} lock on {}: {}", tx, mode, self.block, reason);
            }
        }
        // The queue changed either way; later requests may now be grantable
        self.waiters.notify_all();
        outcome
    }

    /// Drops whatever `tx` holds on this block. Returns false if it held nothing.
    pub fn release(&self, tx: TransactionID) -> bool {
        let mut state = self.state.lock();
        let was_shared = state.shared.remove(&tx);
        let was_exclusive = state.exclusive == Some(tx);
        if was_exclusive {
            state.exclusive = None;
        }
        if was_shared || was_exclusive {
            self.waiters.notify_all();
        }
        was_shared || was_exclusive
    }

    /// Wakes every waiter so it re-evaluates its request.
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.waiters.notify_all();
    }

    pub fn mode_held_by(&self, tx: TransactionID) -> Option<LockMode> {
        let state = self.state.lock();
        if state.exclusive == Some(tx) {
            Some(LockMode::Exclusive)
        } else if state.shared.contains(&tx) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    pub fn is_locked_by(&self, tx: TransactionID) -> bool {
        self.mode_held_by(tx).is_some()
    }

    pub fn shared_holders(&self) -> BTreeSet<TransactionID> {
        self.state.lock().shared.iter().copied().collect()
    }

    pub fn exclusive_holder(&self) -> Option<TransactionID> {
        self.state.lock().exclusive
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(f, "Lock[{}: ", self.block)?;
        if let Some(holder) = state.exclusive {
            write!(f, "X by {}", holder)?;
        } else if !state.shared.is_empty() {
            let holders: BTreeSet<_> = state.shared.iter().map(|tx| tx.0).collect();
            write!(f, "S by {:?}", holders)?;
        } else {
            write!(f, "unlocked")?;
        }
        if !state.queue.is_empty() {
            write!(f, ", {} waiting", state.queue.len())?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: u32) -> TransactionID {
        TransactionID(id)
    }

    fn never(_: TransactionID) -> bool {
        false
    }

    #[test]
    fn shared_locks_are_compatible() {
        let lock = Lock::new(BlockID::new("F", 0));
        let graph = WaitForGraph::new();
        for id in 1..=3 {
            lock.acquire(tx(id), LockMode::Shared, Duration::from_millis(10), &graph, &never)
                .unwrap();
        }
        assert_eq!(lock.shared_holders().len(), 3);
        assert_eq!(lock.exclusive_holder(), None);
    }

    #[test]
    fn sole_shared_holder_upgrades() {
        let lock = Lock::new(BlockID::new("F", 0));
        let graph = WaitForGraph::new();
        lock.acquire(tx(1), LockMode::Shared, Duration::from_millis(10), &graph, &never)
            .unwrap();
        lock.acquire(tx(1), LockMode::Exclusive, Duration::from_millis(10), &graph, &never)
            .unwrap();
        assert_eq!(lock.mode_held_by(tx(1)), Some(LockMode::Exclusive));
        assert!(lock.shared_holders().is_empty());
    }

    #[test]
    fn exclusive_conflicts_time_out() {
        let lock = Lock::new(BlockID::new("F", 0));
        let graph = WaitForGraph::new();
        lock.acquire(tx(1), LockMode::Exclusive, Duration::from_millis(10), &graph, &never)
            .unwrap();
        let err = lock
            .acquire(tx(2), LockMode::Shared, Duration::from_millis(20), &graph, &never)
            .unwrap_err();
        assert_eq!(err, AbortReason::Timeout);
        assert_eq!(lock.waiting(), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn victim_flag_aborts_wait() {
        let lock = Lock::new(BlockID::new("F", 0));
        let graph = WaitForGraph::new();
        lock.acquire(tx(1), LockMode::Exclusive, Duration::from_millis(10), &graph, &never)
            .unwrap();
        let err = lock
            .acquire(tx(2), LockMode::Exclusive, Duration::from_secs(5), &graph, &|t| t == tx(2))
            .unwrap_err();
        assert_eq!(err, AbortReason::Deadlock);
    }

    #[test]
    fn shared_request_does_not_pass_queued_exclusive() {
        let mut state = LockState::default();
        state.shared.insert(tx(1));
        state.queue.push_back(LockRequest { tx: tx(2), mode: LockMode::Exclusive });
        state.queue.push_back(LockRequest { tx: tx(3), mode: LockMode::Shared });

        assert!(!state.can_grant(tx(2), LockMode::Exclusive));
        assert!(!state.can_grant(tx(3), LockMode::Shared));
        assert_eq!(state.blockers(tx(3), LockMode::Shared), [tx(2)].into_iter().collect::<BTreeSet<_>>());
        assert_eq!(state.blockers(tx(2), LockMode::Exclusive), [tx(1)].into_iter().collect::<BTreeSet<_>>());
    }
}
