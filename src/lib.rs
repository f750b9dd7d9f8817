pub mod buffer;
pub mod common;
pub mod lock;
pub mod log_mod;
pub mod recovery;
pub mod storage;
pub mod transaction;

pub use buffer::BufferManager;
pub use common::{BlockID, DatabaseConfig, DbError, Result, TransactionID, LSN};
pub use lock::{IsolationLevel, LockTable};
pub use log_mod::LogManager;
pub use recovery::{CheckpointManager, RecoveryReport};
pub use storage::{DBFiles, FileManager};
pub use transaction::{Transaction, TransactionManager};

use std::sync::Arc;

use log::info;

use crate::lock::{victim_strategy, DeadlockDetector};
use crate::recovery::RecoveryManager;

pub struct Database {
    config: DatabaseConfig,
    files: DBFiles,
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    buffer_manager: Arc<BufferManager>,
    lock_table: Arc<LockTable>,
    transaction_manager: TransactionManager,
    checkpoint_manager: CheckpointManager,
    deadlock_detector: Option<DeadlockDetector>,
    recovery_report: RecoveryReport,
    closed: bool,
}

impl Database {
    /// Opens (or creates) the database in `config.db_directory` and runs crash
    /// recovery before anything else can touch the data. A recovery failure
    /// fails the open.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let files = DBFiles::new(&config.db_directory)?;
        let file_manager = Arc::new(FileManager::new(files.data_directory(), config.block_size)?);
        let log_manager = Arc::new(LogManager::new(&files.get_log_file_path())?);
        let buffer_manager = Arc::new(BufferManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            config.buffer_pool_size,
            config.replacement,
            config.pin_timeout,
        ));

        let recovery_report =
            RecoveryManager::new(Arc::clone(&log_manager), Arc::clone(&buffer_manager)).recover()?;

        let lock_table = Arc::new(LockTable::new(config.lock_timeout));
        let mut transaction_manager = TransactionManager::new(
            recovery_report.max_transaction_id.next(),
            config.default_isolation,
            Arc::clone(&buffer_manager),
            Arc::clone(&log_manager),
            Arc::clone(&lock_table),
        );

        let deadlock_detector = if config.deadlock_detection {
            let (detector, victims) = DeadlockDetector::start(
                Arc::clone(lock_table.wait_for_graph()),
                config.deadlock_detection_interval,
                victim_strategy(config.victim_strategy),
            )?;
            transaction_manager.listen_for_victims(victims)?;
            Some(detector)
        } else {
            None
        };

        let mut checkpoint_manager =
            CheckpointManager::new(Arc::clone(&log_manager), Arc::clone(transaction_manager.registry()));
        if let Some(interval) = config.checkpoint_interval {
            checkpoint_manager.start(interval)?;
        }

        info!(
            "database opened at {:?}: block size {}, {} buffers, next transaction {}",
            config.db_directory,
            config.block_size,
            config.buffer_pool_size,
            transaction_manager.next_transaction_id()
        );

        Ok(Self {
            config,
            files,
            file_manager,
            log_manager,
            buffer_manager,
            lock_table,
            transaction_manager,
            checkpoint_manager,
            deadlock_detector,
            recovery_report,
            closed: false,
        })
    }

    pub fn begin(&self) -> Result<Transaction> {
        self.transaction_manager.begin()
    }

    pub fn begin_with(&self, isolation: IsolationLevel) -> Result<Transaction> {
        self.transaction_manager.begin_with(isolation)
    }

    /// Writes a checkpoint now. None if the log has not grown since the last one.
    pub fn checkpoint(&self) -> Result<Option<LSN>> {
        self.checkpoint_manager.checkpoint()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn files(&self) -> &DBFiles {
        &self.files
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.lock_table
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoint_manager
    }

    pub fn deadlock_detector(&self) -> Option<&DeadlockDetector> {
        self.deadlock_detector.as_ref()
    }

    /// What recovery did when this database was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    /// Stops the background threads and forces buffers and log. Transactions
    /// still active are left for the next recovery.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.checkpoint_manager.stop();
        if let Some(mut detector) = self.deadlock_detector.take() {
            detector.stop();
        }
        self.transaction_manager.join_victim_listener();

        self.buffer_manager.flush_all_dirty()?;
        self.log_manager.flush_all()?;
        info!("database at {:?} closed", self.config.db_directory);
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("closing database failed: {}", e);
        }
    }
}
