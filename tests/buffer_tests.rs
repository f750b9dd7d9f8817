mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::storage;
use minidb_tx::{
    common::{BlockID, DbError, ReplacementStrategy, Result, TransactionID},
    log_mod::LogRecord,
    storage::Page,
};

#[test]
fn test_pin_shares_frame_for_same_block() -> Result<()> {
    let s = storage(2, ReplacementStrategy::FirstFit, Duration::from_millis(100))?;
    let block = s.files.append("t.tbl")?;

    let f1 = s.buffers.pin(&block)?;
    let f2 = s.buffers.pin(&block)?;
    assert_eq!(f1.id(), f2.id());
    assert_eq!(f1.pin_count(), 2);
    assert_eq!(s.buffers.available(), 1);

    s.buffers.unpin(&f1);
    s.buffers.unpin(&f2);
    assert_eq!(f1.pin_count(), 0);
    // Unpinning an unpinned frame does not underflow
    s.buffers.unpin(&f1);
    assert_eq!(f1.pin_count(), 0);
    assert_eq!(s.buffers.available(), 2);
    Ok(())
}

#[test]
fn test_full_pool_times_out() -> Result<()> {
    let s = storage(2, ReplacementStrategy::FirstFit, Duration::from_millis(100))?;
    let _a = s.buffers.pin(&BlockID::new("t.tbl", 0))?;
    let _b = s.buffers.pin(&BlockID::new("t.tbl", 1))?;

    let started = Instant::now();
    let result = s.buffers.pin(&BlockID::new("t.tbl", 2));
    assert!(matches!(result, Err(DbError::BufferPoolFull)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    Ok(())
}

#[test]
fn test_pin_waits_for_unpin() -> Result<()> {
    let s = storage(1, ReplacementStrategy::FirstFit, Duration::from_secs(5))?;
    let held = s.buffers.pin(&BlockID::new("t.tbl", 0))?;

    thread::scope(|scope| {
        let waiter = scope.spawn(|| s.buffers.pin(&BlockID::new("t.tbl", 1)).map(|f| f.id()));
        thread::sleep(Duration::from_millis(100));
        s.buffers.unpin(&held);
        let frame_id = waiter.join().expect("waiter panicked")?;
        assert_eq!(frame_id, held.id());
        Ok(())
    })
}

#[test]
fn test_eviction_writes_back_dirty_page() -> Result<()> {
    for strategy in [ReplacementStrategy::FirstFit, ReplacementStrategy::Lru, ReplacementStrategy::Clock] {
        let s = storage(1, strategy, Duration::from_millis(100))?;
        let a = s.files.append("t.tbl")?;
        let b = s.files.append("t.tbl")?;

        s.buffers.with_pinned(&a, |frame| frame.set_int(8, 42, TransactionID(1), None))?;
        // Only one frame: pinning b evicts a
        s.buffers.with_pinned(&b, |frame| {
            assert_eq!(frame.block(), Some(b.clone()));
            Ok(())
        })?;

        let mut page = Page::new(s.files.block_size());
        s.files.read(&a, &mut page)?;
        assert_eq!(page.get_int(8)?, 42, "{:?} lost the dirty page", strategy);
    }
    Ok(())
}

#[test]
fn test_flush_forces_log_first() -> Result<()> {
    let s = storage(2, ReplacementStrategy::Lru, Duration::from_millis(100))?;
    let block = s.files.append("t.tbl")?;
    let tx = TransactionID(3);

    let lsn = s.log.append(&LogRecord::SetInt {
        tx,
        block: block.clone(),
        offset: 0,
        old_value: 0,
    })?;
    assert!(s.log.durable_lsn() <= lsn);

    let frame = s.buffers.pin(&block)?;
    frame.set_int(0, 7, tx, Some(lsn))?;
    assert!(frame.is_dirty());
    assert_eq!(frame.modifying_tx(), Some(tx));
    s.buffers.flush_all(tx)?;
    s.buffers.unpin(&frame);

    assert!(s.log.durable_lsn() > lsn);
    assert!(!frame.is_dirty());
    Ok(())
}

#[test]
fn test_out_of_bounds_access_is_rejected() -> Result<()> {
    let s = storage(1, ReplacementStrategy::FirstFit, Duration::from_millis(100))?;
    let block = s.files.append("t.tbl")?;
    let size = s.files.block_size();

    let frame = s.buffers.pin(&block)?;
    assert!(matches!(frame.get_int(size - 2), Err(DbError::PageOverflow { .. })));
    assert!(matches!(
        frame.set_string(size - 4, "x", TransactionID(1), None),
        Err(DbError::PageOverflow { .. })
    ));
    assert!(!frame.is_dirty());
    s.buffers.unpin(&frame);
    Ok(())
}
