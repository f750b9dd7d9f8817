mod common;

use std::thread;
use std::time::Duration;

use minidb_tx::{
    common::{DbError, Result},
    lock::LockMode,
    log_mod::LogRecordType,
    transaction::TransactionState,
    IsolationLevel,
};

#[test]
fn test_commit_makes_writes_visible() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    let mut tx1 = db.begin()?;
    tx1.write_int(&block, 0, 100)?;
    tx1.write_string(&block, 4, "hello")?;
    // A transaction sees its own writes
    assert_eq!(tx1.read_int(&block, 0)?, 100);
    tx1.commit()?;
    assert_eq!(tx1.state(), TransactionState::Committed);

    let mut tx2 = db.begin()?;
    assert!(tx2.id() > tx1.id());
    assert_eq!(tx2.read_int(&block, 0)?, 100);
    assert_eq!(tx2.read_string(&block, 4)?, "hello");
    tx2.commit()?;

    let log = db.log_manager();
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::Commit), 2);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::SetString), 1);
    Ok(())
}

#[test]
fn test_rollback_restores_pre_images() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    let mut setup = db.begin()?;
    setup.write_int(&block, 0, 5)?;
    setup.write_string(&block, 20, "before")?;
    setup.commit()?;

    let mut tx = db.begin()?;
    tx.write_int(&block, 0, 6)?;
    tx.write_int(&block, 0, 7)?;
    tx.write_string(&block, 20, "after!")?;
    tx.write_int(&block, 100, 1)?;
    tx.rollback()?;
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(tx.locks().lock_count(), 0);

    let mut check = db.begin()?;
    assert_eq!(check.read_int(&block, 0)?, 5);
    assert_eq!(check.read_string(&block, 20)?, "before");
    assert_eq!(check.read_int(&block, 100)?, 0);
    check.commit()?;
    Ok(())
}

#[test]
fn test_finished_transaction_rejects_operations() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    let mut tx = db.begin()?;
    tx.commit()?;
    assert!(matches!(tx.read_int(&block, 0), Err(DbError::TransactionNotActive(_))));
    assert!(matches!(tx.write_int(&block, 0, 1), Err(DbError::TransactionNotActive(_))));
    assert!(matches!(tx.commit(), Err(DbError::TransactionNotActive(_))));
    assert!(matches!(tx.rollback(), Err(DbError::TransactionNotActive(_))));
    Ok(())
}

#[test]
fn test_contract_violation_keeps_transaction_active() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;
    let block_size = db.file_manager().block_size();

    let mut tx = db.begin()?;
    tx.write_int(&block, 0, 11)?;
    let records_before = db.log_manager().get_total_log_records();

    let long = "x".repeat(block_size);
    assert!(matches!(tx.write_string(&block, 0, &long), Err(DbError::PageOverflow { .. })));
    assert!(matches!(tx.write_int(&block, block_size - 1, 3), Err(DbError::PageOverflow { .. })));
    assert!(tx.is_active());
    // Nothing was logged for the rejected writes
    assert_eq!(db.log_manager().get_total_log_records(), records_before);

    tx.commit()?;
    let mut check = db.begin()?;
    assert_eq!(check.read_int(&block, 0)?, 11);
    check.commit()?;
    Ok(())
}

#[test]
fn test_dropped_transaction_is_rolled_back() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    {
        let mut tx = db.begin()?;
        tx.write_int(&block, 0, 77)?;
    }

    assert!(db.transaction_manager().active_transactions().is_empty());
    assert!(!db.lock_table().is_locked(&block));
    let mut check = db.begin()?;
    assert_eq!(check.read_int(&block, 0)?, 0);
    check.commit()?;
    assert_eq!(db.log_manager().get_total_log_records_of_type(LogRecordType::Rollback), 1);
    Ok(())
}

#[test]
fn test_read_uncommitted_sees_dirty_value() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    let mut writer = db.begin()?;
    writer.write_int(&block, 0, 42)?;

    let mut reader = db.begin_with(IsolationLevel::ReadUncommitted)?;
    assert_eq!(reader.read_int(&block, 0)?, 42);
    assert_eq!(reader.locks().lock_count(), 0);
    reader.commit()?;

    writer.rollback()?;
    Ok(())
}

#[test]
fn test_read_committed_waits_for_writer_and_releases_early() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    let mut writer = db.begin()?;
    writer.write_int(&block, 0, 42)?;

    let mut reader = db.begin_with(IsolationLevel::ReadCommitted)?;
    let handle = thread::spawn(move || -> Result<(i32, usize)> {
        let value = reader.read_int(&block, 0)?;
        let held = reader.locks().lock_count();
        reader.commit()?;
        Ok((value, held))
    });

    thread::sleep(Duration::from_millis(100));
    writer.commit()?;

    let (value, held) = handle.join().expect("reader panicked")?;
    assert_eq!(value, 42);
    assert_eq!(held, 0, "READ COMMITTED keeps no read locks");
    Ok(())
}

#[test]
fn test_repeatable_read_holds_read_locks() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    for isolation in [IsolationLevel::RepeatableRead, IsolationLevel::Serializable] {
        let mut reader = db.begin_with(isolation)?;
        assert_eq!(reader.isolation(), isolation);
        reader.read_int(&block, 0)?;
        assert_eq!(reader.locks().mode_of(&block), Some(LockMode::Shared));
        reader.commit()?;
        assert_eq!(reader.locks().lock_count(), 0);
    }
    Ok(())
}

#[test]
fn test_write_locks_are_held_until_commit() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let a = db.file_manager().append("t.tbl")?;
    let b = db.file_manager().append("t.tbl")?;

    let mut tx = db.begin()?;
    tx.write_int(&a, 0, 1)?;
    tx.read_int(&b, 0)?;
    tx.write_int(&b, 0, 2)?;
    assert_eq!(tx.locks().locked_blocks(), vec![a.clone(), b.clone()]);
    assert!(tx.locks().locked_blocks().iter().all(|blk| tx.locks().mode_of(blk) == Some(LockMode::Exclusive)));

    tx.commit()?;
    assert!(!db.lock_table().is_locked(&a));
    assert!(!db.lock_table().is_locked(&b));
    Ok(())
}

#[test]
fn test_default_isolation_comes_from_config() -> Result<()> {
    common::init_logging();
    let dir = tempfile::TempDir::new()?;
    let config = common::test_config(&dir).with_default_isolation(IsolationLevel::RepeatableRead);
    let db = minidb_tx::Database::open(config)?;
    let mut tx = db.begin()?;
    assert_eq!(tx.isolation(), IsolationLevel::RepeatableRead);
    tx.commit()?;
    Ok(())
}

#[test]
fn test_rollback_of_longer_string_restores_neighbours() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;

    let mut setup = db.begin()?;
    setup.write_string(&block, 0, "ab")?;
    setup.write_int(&block, 8, 77)?;
    setup.commit()?;

    let mut tx = db.begin()?;
    assert_eq!(tx.read_int(&block, 4)?, 0);
    tx.write_string(&block, 0, "hello world")?;
    tx.write_string(&block, 100, "on a fresh slot")?;
    tx.rollback()?;

    let mut check = db.begin()?;
    assert_eq!(check.read_string(&block, 0)?, "ab");
    assert_eq!(check.read_int(&block, 8)?, 77);
    assert_eq!(check.read_int(&block, 12)?, 0);
    for offset in (100..120).step_by(4) {
        assert_eq!(check.read_int(&block, offset)?, 0, "int at {}", offset);
    }
    check.commit()?;
    Ok(())
}

#[test]
fn test_string_over_int_slot_rolls_back() -> Result<()> {
    let (_dir, db) = common::open_temp_db()?;
    let block = db.file_manager().append("t.tbl")?;
    let last = db.file_manager().block_size() - 4;

    let mut setup = db.begin()?;
    setup.write_int(&block, 0, -1)?;
    setup.write_int(&block, 4, 12345)?;
    setup.write_int(&block, last, -7)?;
    setup.commit()?;

    let mut tx = db.begin()?;
    tx.write_string(&block, 0, "abc")?;
    // Ends at the last byte of the block
    tx.write_string(&block, last - 2, "xy")?;
    assert_eq!(tx.read_string(&block, 0)?, "abc");
    assert!(tx.is_active());
    tx.rollback()?;

    let mut check = db.begin()?;
    assert_eq!(check.read_int(&block, 0)?, -1);
    assert_eq!(check.read_int(&block, 4)?, 12345);
    assert_eq!(check.read_int(&block, last)?, -7);
    check.commit()?;
    Ok(())
}
