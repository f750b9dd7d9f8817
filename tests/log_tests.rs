mod common;

use std::fs::OpenOptions;
use std::io::Write;

use minidb_tx::{
    common::{BlockID, Result, TransactionID, LSN},
    log_mod::{LogManager, LogRecord, LogRecordType},
};
use tempfile::TempDir;

#[test]
fn test_log_manager_basic() -> Result<()> {
    common::init_logging();
    let dir = TempDir::new()?;
    let log_manager = LogManager::new(&dir.path().join("wal.log"))?;

    let tx = TransactionID(1);
    let block = BlockID::new("t.tbl", 2);
    let start = log_manager.log_txn_begin(tx)?;
    let set = log_manager.log_set_int(tx, &block, 16, -5)?;
    let commit = log_manager.log_commit(tx)?;

    // LSNs are frame offsets: 4-byte prefix + 8-byte body for START
    assert_eq!(start, LSN(0));
    assert_eq!(set, LSN(12));
    assert!(commit > set);

    assert_eq!(log_manager.get_total_log_records_of_type(LogRecordType::Start), 1);
    assert_eq!(log_manager.get_total_log_records_of_type(LogRecordType::SetInt), 1);
    assert_eq!(log_manager.get_total_log_records_of_type(LogRecordType::Commit), 1);
    assert_eq!(log_manager.get_total_log_records(), 3);

    let records = log_manager.read_all()?;
    assert_eq!(
        records,
        vec![
            (start, LogRecord::Start { tx }),
            (
                set,
                LogRecord::SetInt {
                    tx,
                    block,
                    offset: 16,
                    old_value: -5
                }
            ),
            (commit, LogRecord::Commit { tx }),
        ]
    );
    assert_eq!(log_manager.read_from(set)?.len(), 2);
    Ok(())
}

#[test]
fn test_flush_is_skipped_when_already_durable() -> Result<()> {
    let dir = TempDir::new()?;
    let log_manager = LogManager::new(&dir.path().join("wal.log"))?;

    let first = log_manager.log_txn_begin(TransactionID(1))?;
    assert_eq!(log_manager.durable_lsn(), LSN(0));
    log_manager.flush(first)?;
    let durable = log_manager.durable_lsn();
    assert_eq!(durable, log_manager.end_lsn());

    let second = log_manager.log_txn_begin(TransactionID(2))?;
    // Covered by the earlier force, nothing to do
    log_manager.flush(first)?;
    assert_eq!(log_manager.durable_lsn(), durable);

    log_manager.flush(second)?;
    assert_eq!(log_manager.durable_lsn(), log_manager.end_lsn());
    Ok(())
}

#[test]
fn test_log_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("wal.log");
    {
        let log_manager = LogManager::new(&path)?;
        log_manager.log_txn_begin(TransactionID(4))?;
        log_manager.log_set_string(TransactionID(4), &BlockID::new("t.tbl", 0), 0, "old")?;
        log_manager.log_checkpoint(&[TransactionID(4)])?;
        log_manager.flush_all()?;
    }

    let log_manager = LogManager::new(&path)?;
    let records = log_manager.read_all()?;
    assert_eq!(records.len(), 3);
    assert_eq!(
        records[2].1,
        LogRecord::Checkpoint {
            active: vec![TransactionID(4)]
        }
    );
    assert_eq!(records[2].1.tx_id(), None);
    Ok(())
}

#[test]
fn test_torn_tail_is_truncated() -> Result<()> {
    common::init_logging();
    let dir = TempDir::new()?;
    let path = dir.path().join("wal.log");
    let valid_end = {
        let log_manager = LogManager::new(&path)?;
        log_manager.log_txn_begin(TransactionID(1))?;
        log_manager.log_commit(TransactionID(1))?;
        log_manager.flush_all()?;
        log_manager.end_lsn()
    };

    // A record whose length prefix promises more bytes than were written
    let mut file = OpenOptions::new().append(true).open(&path)?;
    file.write_all(&[0, 0, 0, 40, 0, 0, 0, 4, 0])?;
    file.sync_all()?;
    drop(file);

    let log_manager = LogManager::new(&path)?;
    assert_eq!(log_manager.end_lsn(), valid_end);
    assert_eq!(std::fs::metadata(&path)?.len(), valid_end.0);
    assert_eq!(log_manager.read_all()?.len(), 2);

    // New records follow the valid prefix and are readable
    let lsn = log_manager.log_txn_begin(TransactionID(2))?;
    assert_eq!(lsn, valid_end);
    assert_eq!(log_manager.read_all()?.len(), 3);
    Ok(())
}
