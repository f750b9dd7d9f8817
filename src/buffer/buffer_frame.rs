use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{BlockID, Result, TransactionID, LSN};
use crate::log_mod::LogManager;
use crate::storage::{FileManager, Page};

struct FrameState {
    page: Page,
    block: Option<BlockID>,
    // Set while the page differs from disk
    modified_by: Option<TransactionID>,
    // Latest undo record covering the page contents
    lsn: Option<LSN>,
}

/// One slot of the buffer pool holding the image of at most one block.
pub struct BufferFrame {
    id: usize,
    // Reference count, can't evict while > 0. Kept outside the state mutex so
    // the pool can test it without waiting on a frame doing I/O.
    pins: AtomicU32,
    state: Mutex<FrameState>,
}

impl BufferFrame {
    pub(crate) fn new(id: usize, block_size: usize) -> Self {
        Self {
            id,
            pins: AtomicU32::new(0),
            state: Mutex::new(FrameState {
                page: Page::new(block_size),
                block: None,
                modified_by: None,
                lsn: None,
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn block(&self) -> Option<BlockID> {
        self.state.lock().block.clone()
    }

    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::SeqCst)
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().modified_by.is_some()
    }

    pub fn modifying_tx(&self) -> Option<TransactionID> {
        self.state.lock().modified_by
    }

    pub fn lsn(&self) -> Option<LSN> {
        self.state.lock().lsn
    }

    /// Copy of the current page image.
    pub fn contents(&self) -> Page {
        self.state.lock().page.clone()
    }

    pub fn get_int(&self, offset: usize) -> Result<i32> {
        self.state.lock().page.get_int(offset)
    }

    pub fn get_string(&self, offset: usize) -> Result<String> {
        self.state.lock().page.get_string(offset)
    }

    /// Writes into the page and marks it dirty on behalf of `tx`. `lsn` is the
    /// undo record that has to be durable before this page may reach disk.
    pub fn set_int(&self, offset: usize, value: i32, tx: TransactionID, lsn: Option<LSN>) -> Result<()> {
        let mut state = self.state.lock();
        state.page.set_int(offset, value)?;
        Self::mark_modified(&mut state, tx, lsn);
        Ok(())
    }

    pub fn set_string(&self, offset: usize, value: &str, tx: TransactionID, lsn: Option<LSN>) -> Result<()> {
        let mut state = self.state.lock();
        state.page.set_string(offset, value)?;
        Self::mark_modified(&mut state, tx, lsn);
        Ok(())
    }

    fn mark_modified(state: &mut FrameState, tx: TransactionID, lsn: Option<LSN>) {
        state.modified_by = Some(tx);
        if lsn.is_some() {
            state.lsn = lsn;
        }
    }

    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the remaining pin count. Unpinning an unpinned frame is a no-op.
    pub(crate) fn unpin(&self) -> u32 {
        match self
            .pins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pins| pins.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    /// Writes the page back if dirty, forcing the log first so that the undo
    /// information for every change on the page is durable before the page is.
    pub(crate) fn flush(&self, files: &FileManager, log: &LogManager) -> Result<()> {
        let mut state = self.state.lock();
        Self::flush_locked(&mut state, files, log)
    }

    fn flush_locked(state: &mut FrameState, files: &FileManager, log: &LogManager) -> Result<()> {
        if state.modified_by.is_none() {
            return Ok(());
        }
        if let Some(lsn) = state.lsn {
            log.flush(lsn)?;
        }
        if let Some(block) = &state.block {
            files.write(block, &state.page)?;
        }
        state.modified_by = None;
        state.lsn = None;
        Ok(())
    }

    // Holds the frame mutex, standing in for slow I/O on this frame
    #[cfg(test)]
    pub(crate) fn stall(&self) -> impl Sized + '_ {
        self.state.lock()
    }

    /// Loads `block` into a frame the pool reserved for it: flushes the old
    /// contents, then reads the new block. On error the frame keeps its
    /// previous block and contents.
    pub(crate) fn load(&self, block: &BlockID, files: &FileManager, log: &LogManager) -> Result<()> {
        let mut state = self.state.lock();
        Self::flush_locked(&mut state, files, log)?;

        let mut page = Page::new(state.page.size());
        files.read(block, &mut page)?;

        state.page = page;
        state.block = Some(block.clone());
        state.modified_by = None;
        state.lsn = None;
        Ok(())
    }
}
