use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::buffer::{BufferFrame, BufferManager};
use crate::common::{BlockID, DbError, Result, TransactionID, LSN};
use crate::lock::{IsolationLevel, LockManager, LockTable};
use crate::log_mod::{LogManager, LogRecord};
use crate::storage::Page;
use crate::transaction::TransactionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// A unit of work over blocks. Reads and writes take locks according to the
/// isolation level; every write is undo-logged, forced and written through
/// before the call returns. A transaction that hits a lock abort or an I/O
/// failure rolls itself back before returning the error.
pub struct Transaction {
    id: TransactionID,
    isolation: IsolationLevel,
    state: TransactionState,
    start_lsn: LSN,
    locks: LockManager,
    buffers: Arc<BufferManager>,
    log: Arc<LogManager>,
    registry: Arc<TransactionRegistry>,
}

impl Transaction {
    pub(crate) fn begin(
        id: TransactionID,
        isolation: IsolationLevel,
        buffers: Arc<BufferManager>,
        log: Arc<LogManager>,
        lock_table: Arc<LockTable>,
        registry: Arc<TransactionRegistry>,
    ) -> Result<Self> {
        // Registered before START is written, so a checkpoint can never miss
        // a transaction whose START precedes it
        registry.register(id);
        let start_lsn = match log.log_txn_begin(id) {
            Ok(lsn) => lsn,
            Err(e) => {
                registry.unregister(id);
                return Err(e);
            }
        };

        if isolation.uses_predicate_locks() {
            debug!("{} runs {} without predicate locks, as REPEATABLE READ", id, isolation);
        }
        debug!("{} started at {} with isolation {}", id, start_lsn, isolation);

        Ok(Self {
            id,
            isolation,
            state: TransactionState::Active,
            start_lsn,
            locks: LockManager::new(id, lock_table),
            buffers,
            log,
            registry,
        })
    }

    pub fn id(&self) -> TransactionID {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// LSN of this transaction's START record.
    pub fn start_lsn(&self) -> LSN {
        self.start_lsn
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn read_int(&mut self, block: &BlockID, offset: usize) -> Result<i32> {
        self.ensure_active()?;
        let result = self.read_with(block, |frame| frame.get_int(offset));
        self.finish_op(result)
    }

    pub fn read_string(&mut self, block: &BlockID, offset: usize) -> Result<String> {
        self.ensure_active()?;
        let result = self.read_with(block, |frame| frame.get_string(offset));
        self.finish_op(result)
    }

    /// Returns the LSN of the undo record written for this change.
    pub fn write_int(&mut self, block: &BlockID, offset: usize, value: i32) -> Result<LSN> {
        self.ensure_active()?;
        let result = self.write_int_inner(block, offset, value);
        self.finish_op(result)
    }

    /// Returns the LSN of the last undo record written for this change. Bytes
    /// the new value covers beyond the old string (or all of them, when the
    /// old bytes are not a string) are saved as int undo records.
    pub fn write_string(&mut self, block: &BlockID, offset: usize, value: &str) -> Result<LSN> {
        self.ensure_active()?;
        let result = self.write_string_inner(block, offset, value);
        self.finish_op(result)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let result = self.commit_inner();
        self.finish_op(result)
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.rollback_inner()
    }

    fn read_with<T>(&mut self, block: &BlockID, read: impl FnOnce(&BufferFrame) -> Result<T>) -> Result<T> {
        if self.isolation.uses_read_locks() {
            self.locks.s_lock(block)?;
        }
        let value = self.buffers.with_pinned(block, read);
        if self.isolation.uses_read_locks() && !self.isolation.holds_read_locks() {
            self.locks.release_shared(block)?;
        }
        value
    }

    fn write_int_inner(&mut self, block: &BlockID, offset: usize, value: i32) -> Result<LSN> {
        self.locks.x_lock(block)?;
        let (tx, log, buffers) = (self.id, &self.log, &self.buffers);
        buffers.with_pinned(block, |frame| {
            // Also rejects a bad offset before anything is logged
            let old_value = frame.get_int(offset)?;
            let lsn = log.log_set_int(tx, block, offset, old_value)?;
            log.flush(lsn)?;
            frame.set_int(offset, value, tx, Some(lsn))?;
            buffers.flush(frame)?;
            debug!("{} set int {} at {}+{} (was {})", tx, value, block, offset, old_value);
            Ok(lsn)
        })
    }

    fn write_string_inner(&mut self, block: &BlockID, offset: usize, value: &str) -> Result<LSN> {
        let block_size = self.buffers.file_manager().block_size();
        let len = Page::string_size(value);
        if offset.checked_add(len).map_or(true, |end| end > block_size) {
            return Err(DbError::PageOverflow {
                offset,
                len,
                block_size,
            });
        }

        self.locks.x_lock(block)?;
        let (tx, log, buffers) = (self.id, &self.log, &self.buffers);
        buffers.with_pinned(block, |frame| {
            let before = frame.contents();
            let mut undo = Vec::new();
            // The old string restores its own footprint, if the bytes hold one
            let restored = match before.get_string(offset) {
                Ok(old_value) => {
                    undo.push(log.log_set_string(tx, block, offset, &old_value)?);
                    Page::string_size(&old_value)
                }
                Err(_) => 0,
            };
            // Whatever the new value covers beyond that is saved int by int
            if restored < len {
                for at in before.covering_ints(offset + restored, offset + len) {
                    undo.push(log.log_set_int(tx, block, at, before.get_int(at)?)?);
                }
            }
            let lsn = *undo
                .last()
                .ok_or_else(|| DbError::Other(format!("no undo recorded for {}+{}", block, offset)))?;

            log.flush(lsn)?;
            frame.set_string(offset, value, tx, Some(lsn))?;
            buffers.flush(frame)?;
            debug!(
                "{} set string {:?} at {}+{} ({} undo records)",
                tx,
                value,
                block,
                offset,
                undo.len()
            );
            Ok(lsn)
        })
    }

    fn commit_inner(&mut self) -> Result<()> {
        self.buffers.flush_all(self.id)?;
        let lsn = self.log.log_commit(self.id)?;
        self.log.flush(lsn)?;
        self.finish(TransactionState::Committed);
        info!("{} committed", self.id);
        Ok(())
    }

    /// Undoes this transaction's changes newest first, reading the log only
    /// from its own START record onwards.
    fn rollback_inner(&mut self) -> Result<()> {
        let records = self.log.read_from(self.start_lsn)?;
        for (_, record) in records.iter().rev() {
            if record.tx_id() != Some(self.id) {
                continue;
            }
            match record {
                LogRecord::Start { .. } => break,
                LogRecord::SetInt {
                    block,
                    offset,
                    old_value,
                    ..
                } => {
                    let offset = *offset as usize;
                    self.buffers.with_pinned(block, |frame| {
                        frame.set_int(offset, *old_value, self.id, None)?;
                        self.buffers.flush(frame)
                    })?;
                }
                LogRecord::SetString {
                    block,
                    offset,
                    old_value,
                    ..
                } => {
                    let offset = *offset as usize;
                    self.buffers.with_pinned(block, |frame| {
                        frame.set_string(offset, old_value, self.id, None)?;
                        self.buffers.flush(frame)
                    })?;
                }
                LogRecord::Commit { .. } | LogRecord::Rollback { .. } | LogRecord::Checkpoint { .. } => {}
            }
        }

        let lsn = self.log.log_abort(self.id)?;
        self.log.flush(lsn)?;
        self.finish(TransactionState::RolledBack);
        info!("{} rolled back", self.id);
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.registry.unregister(self.id);
        self.locks.release_all();
    }

    fn finish_op<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.requires_rollback() && self.is_active() {
                warn!("{} failed ({}), rolling back", self.id, e);
                if let Err(rollback_err) = self.rollback_inner() {
                    error!("{} rollback after failure failed: {}", self.id, rollback_err);
                }
            }
        }
        result
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(DbError::TransactionNotActive(self.id));
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            warn!("{} dropped while active, rolling back", self.id);
            if let Err(e) = self.rollback_inner() {
                error!("{} rollback on drop failed: {}", self.id, e);
            }
        }
    }
}
