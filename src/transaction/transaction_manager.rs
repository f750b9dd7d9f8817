use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::buffer::BufferManager;
use crate::common::{Result, TransactionID};
use crate::lock::{IsolationLevel, LockTable};
use crate::log_mod::LogManager;
use crate::transaction::Transaction;

/// Ids of the transactions that have started and not yet finished.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    active: Mutex<BTreeSet<TransactionID>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tx: TransactionID) {
        self.active.lock().insert(tx);
    }

    pub fn unregister(&self, tx: TransactionID) {
        self.active.lock().remove(&tx);
    }

    pub fn is_active(&self, tx: TransactionID) -> bool {
        self.active.lock().contains(&tx)
    }

    /// Snapshot in ascending id order.
    pub fn active(&self) -> Vec<TransactionID> {
        self.active.lock().iter().copied().collect()
    }

    /// Runs `f` on the active set while no transaction can register or
    /// unregister. Checkpoints append their record from inside `f`, so every
    /// START before a checkpoint belongs to a transaction in its snapshot or
    /// to one that already finished.
    pub fn with_snapshot<T>(&self, f: impl FnOnce(&[TransactionID]) -> T) -> T {
        let active = self.active.lock();
        let ids: Vec<TransactionID> = active.iter().copied().collect();
        f(&ids)
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}

pub struct TransactionManager {
    next_id: AtomicU32,
    default_isolation: IsolationLevel,
    buffer_manager: Arc<BufferManager>,
    log_manager: Arc<LogManager>,
    lock_table: Arc<LockTable>,
    registry: Arc<TransactionRegistry>,
    victim_listener: Option<JoinHandle<()>>,
}

impl TransactionManager {
    /// `first_id` is the id handed to the first transaction; after a restart
    /// it lies above every id found in the log.
    pub fn new(
        first_id: TransactionID,
        default_isolation: IsolationLevel,
        buffer_manager: Arc<BufferManager>,
        log_manager: Arc<LogManager>,
        lock_table: Arc<LockTable>,
    ) -> Self {
        Self {
            next_id: AtomicU32::new(first_id.0.max(1)),
            default_isolation,
            buffer_manager,
            log_manager,
            lock_table,
            registry: Arc::new(TransactionRegistry::new()),
            victim_listener: None,
        }
    }

    pub fn begin(&self) -> Result<Transaction> {
        self.begin_with(self.default_isolation)
    }

    pub fn begin_with(&self, isolation: IsolationLevel) -> Result<Transaction> {
        let id = TransactionID(self.next_id.fetch_add(1, Ordering::SeqCst));
        Transaction::begin(
            id,
            isolation,
            Arc::clone(&self.buffer_manager),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.lock_table),
            Arc::clone(&self.registry),
        )
    }

    /// Id the next `begin` will use.
    pub fn next_transaction_id(&self) -> TransactionID {
        TransactionID(self.next_id.load(Ordering::SeqCst))
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.default_isolation
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.lock_table
    }

    pub fn active_transactions(&self) -> Vec<TransactionID> {
        self.registry.active()
    }

    /// Wakes deadlock victims received on `victims` so they abort. The
    /// listener thread ends once every sender of `victims` is gone.
    pub fn listen_for_victims(&mut self, victims: Receiver<TransactionID>) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let lock_table = Arc::clone(&self.lock_table);
        let handle = thread::Builder::new()
            .name("victim-listener".to_owned())
            .spawn(move || {
                for victim in victims.iter() {
                    if !lock_table.abort_waiter(victim, |tx| registry.is_active(tx)) {
                        debug!("deadlock victim {} already finished", victim);
                    }
                }
                debug!("victim listener exits");
            })?;
        if let Some(old) = self.victim_listener.replace(handle) {
            warn!("replacing a running victim listener");
            drop(old);
        }
        info!("transaction manager listening for deadlock victims");
        Ok(())
    }

    /// Waits for the victim listener to finish. Only returns once the sending
    /// side (the deadlock detector) is stopped.
    pub fn join_victim_listener(&mut self) {
        if let Some(handle) = self.victim_listener.take() {
            if handle.join().is_err() {
                warn!("victim listener thread panicked");
            }
        }
    }
}
