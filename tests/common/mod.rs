#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use minidb_tx::{
    common::ReplacementStrategy, BufferManager, Database, DatabaseConfig, FileManager, LogManager, Result,
};
use tempfile::TempDir;

pub const BLOCK_SIZE: usize = 400;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Short timeouts, fast deadlock detection, no background checkpoints.
pub fn test_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig::new(dir.path())
        .with_block_size(BLOCK_SIZE)
        .with_lock_timeout(Duration::from_secs(2))
        .with_pin_timeout(Duration::from_millis(500))
        .with_deadlock_detection(true, Duration::from_millis(20))
        .with_checkpoint_interval(None)
}

pub fn open_temp_db() -> Result<(TempDir, Database)> {
    init_logging();
    let dir = TempDir::new()?;
    let db = Database::open(test_config(&dir))?;
    Ok((dir, db))
}

pub fn reopen(dir: &TempDir) -> Result<Database> {
    Database::open(test_config(dir))
}

/// File manager, log and buffer pool without the rest of the engine.
pub struct Storage {
    pub dir: TempDir,
    pub files: Arc<FileManager>,
    pub log: Arc<LogManager>,
    pub buffers: BufferManager,
}

pub fn storage(pool_size: usize, strategy: ReplacementStrategy, pin_timeout: Duration) -> Result<Storage> {
    init_logging();
    let dir = TempDir::new()?;
    let files = Arc::new(FileManager::new(&dir.path().join("data"), BLOCK_SIZE)?);
    let log = Arc::new(LogManager::new(&dir.path().join("test.log"))?);
    let buffers = BufferManager::new(
        Arc::clone(&files),
        Arc::clone(&log),
        pool_size,
        strategy,
        pin_timeout,
    );
    Ok(Storage {
        dir,
        files,
        log,
        buffers,
    })
}
