use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::common::{DbError, Result, LSN};
use crate::log_mod::LogManager;
use crate::transaction::TransactionRegistry;

struct Checkpointer {
    log_manager: Arc<LogManager>,
    registry: Arc<TransactionRegistry>,
    // End of the log right after the last checkpoint we wrote
    last_end: Mutex<Option<LSN>>,
    last_checkpoint: Mutex<Option<LSN>>,
    written: AtomicU64,
}

impl Checkpointer {
    fn checkpoint(&self) -> Result<Option<LSN>> {
        let mut last_end = self.last_end.lock();
        if *last_end == Some(self.log_manager.end_lsn()) {
            debug!("log unchanged since last checkpoint, skipping");
            return Ok(None);
        }

        let log_manager = &self.log_manager;
        let (lsn, active) = self.registry.with_snapshot(|active| {
            log_manager
                .log_checkpoint(active)
                .map(|lsn| (lsn, active.len()))
        })?;
        self.log_manager.flush(lsn)?;

        *last_end = Some(self.log_manager.end_lsn());
        *self.last_checkpoint.lock() = Some(lsn);
        self.written.fetch_add(1, Ordering::SeqCst);
        debug!("checkpoint at {} with {} active transactions", lsn, active);
        Ok(Some(lsn))
    }
}

/// Writes CHECKPOINT records listing the active transactions, on demand or
/// periodically from a background thread.
pub struct CheckpointManager {
    inner: Arc<Checkpointer>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CheckpointManager {
    pub fn new(log_manager: Arc<LogManager>, registry: Arc<TransactionRegistry>) -> Self {
        Self {
            inner: Arc::new(Checkpointer {
                log_manager,
                registry,
                last_end: Mutex::new(None),
                last_checkpoint: Mutex::new(None),
                written: AtomicU64::new(0),
            }),
            shutdown: None,
            worker: None,
        }
    }

    /// Writes and forces a checkpoint. Returns None without writing anything
    /// when the log has not grown since the previous checkpoint.
    pub fn checkpoint(&self) -> Result<Option<LSN>> {
        self.inner.checkpoint()
    }

    /// Starts checkpointing every `interval` on a background thread.
    pub fn start(&mut self, interval: Duration) -> Result<()> {
        if self.worker.is_some() {
            return Err(DbError::Other("checkpoint manager already started".to_string()));
        }
        if interval.is_zero() {
            return Err(DbError::InvalidConfig(
                "checkpoint interval must be non-zero".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let worker = thread::Builder::new()
            .name("checkpointer".to_owned())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = inner.checkpoint() {
                            error!("periodic checkpoint failed: {}", e);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        self.shutdown = Some(shutdown_tx);
        self.worker = Some(worker);
        info!("checkpointer started, interval {:?}", interval);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("checkpointer thread panicked");
            }
            info!("checkpointer stopped after {} checkpoints", self.checkpoints_written());
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn checkpoints_written(&self) -> u64 {
        self.inner.written.load(Ordering::SeqCst)
    }

    pub fn last_checkpoint_lsn(&self) -> Option<LSN> {
        *self.inner.last_checkpoint.lock()
    }
}

impl Drop for CheckpointManager {
    fn drop(&mut self) {
        self.stop();
    }
}
