use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info};

use crate::buffer::BufferManager;
use crate::common::{Result, TransactionID, LSN};
use crate::log_mod::{LogManager, LogRecord};

/// Outcome of a recovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transactions whose changes were undone, ascending.
    pub undone: Vec<TransactionID>,
    /// Highest transaction id found in the log, `TransactionID::NONE` if none.
    pub max_transaction_id: TransactionID,
    /// Records examined by the backward (undo) pass.
    pub records_scanned: usize,
    /// LSN of the last checkpoint found by the forward pass.
    pub checkpoint_lsn: Option<LSN>,
}

/// UNDO-only crash recovery: every transaction that has a START but neither a
/// COMMIT nor a ROLLBACK in the log gets its changes reverted.
pub struct RecoveryManager {
    log_manager: Arc<LogManager>,
    buffer_manager: Arc<BufferManager>,
}

impl RecoveryManager {
    pub fn new(log_manager: Arc<LogManager>, buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            log_manager,
            buffer_manager,
        }
    }

    pub fn recover(&self) -> Result<RecoveryReport> {
        let records = self.log_manager.read_all()?;
        let mut report = RecoveryReport::default();

        // Analysis: who is still active, and what the last checkpoint says
        let mut active = BTreeSet::new();
        let mut checkpointed: Option<BTreeSet<TransactionID>> = None;
        let mut started_after_checkpoint = BTreeSet::new();
        for (lsn, record) in &records {
            if let Some(tx) = record.tx_id() {
                report.max_transaction_id = report.max_transaction_id.max(tx);
            }
            match record {
                LogRecord::Start { tx } => {
                    active.insert(*tx);
                    if checkpointed.is_some() {
                        started_after_checkpoint.insert(*tx);
                    }
                }
                LogRecord::Commit { tx } | LogRecord::Rollback { tx } => {
                    active.remove(tx);
                }
                LogRecord::Checkpoint { active: ids } => {
                    if let Some(&max) = ids.iter().max() {
                        report.max_transaction_id = report.max_transaction_id.max(max);
                    }
                    checkpointed = Some(ids.iter().copied().collect());
                    started_after_checkpoint.clear();
                    report.checkpoint_lsn = Some(*lsn);
                }
                LogRecord::SetInt { .. } | LogRecord::SetString { .. } => {}
            }
        }

        let pending: BTreeSet<TransactionID> = match &checkpointed {
            Some(ids) => active
                .iter()
                .copied()
                .filter(|tx| ids.contains(tx) || started_after_checkpoint.contains(tx))
                .collect(),
            None => active,
        };
        debug!(
            "recovery analysis: {} records, pending {:?}, last checkpoint {:?}",
            records.len(),
            pending,
            report.checkpoint_lsn
        );

        // Undo, newest first, until every pending transaction reached its START
        let mut remaining = pending.clone();
        for (_, record) in records.iter().rev() {
            if remaining.is_empty() {
                break;
            }
            report.records_scanned += 1;
            match record {
                LogRecord::SetInt {
                    tx,
                    block,
                    offset,
                    old_value,
                } if remaining.contains(tx) => {
                    let offset = *offset as usize;
                    self.buffer_manager.with_pinned(block, |frame| {
                        frame.set_int(offset, *old_value, *tx, None)?;
                        self.buffer_manager.flush(frame)
                    })?;
                }
                LogRecord::SetString {
                    tx,
                    block,
                    offset,
                    old_value,
                } if remaining.contains(tx) => {
                    let offset = *offset as usize;
                    self.buffer_manager.with_pinned(block, |frame| {
                        frame.set_string(offset, old_value, *tx, None)?;
                        self.buffer_manager.flush(frame)
                    })?;
                }
                LogRecord::Start { tx } => {
                    remaining.remove(tx);
                }
                _ => {}
            }
        }

        // Close out what was undone so a later recovery does not redo the undo
        // over newer committed data
        let ends_in_empty_checkpoint = matches!(
            records.last(),
            Some((_, LogRecord::Checkpoint { active })) if active.is_empty()
        );
        if !pending.is_empty() || (!records.is_empty() && !ends_in_empty_checkpoint) {
            for &tx in &pending {
                self.log_manager.log_abort(tx)?;
            }
            let lsn = self.log_manager.log_checkpoint(&[])?;
            self.log_manager.flush(lsn)?;
        }

        report.undone = pending.into_iter().collect();
        info!(
            "recovery done: undid {:?}, scanned {} records, max transaction id {}",
            report.undone, report.records_scanned, report.max_transaction_id
        );
        Ok(report)
    }
}
