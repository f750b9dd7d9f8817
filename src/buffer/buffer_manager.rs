use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::buffer::replacer::{make_replacer, ReplacementPolicy};
use crate::buffer::BufferFrame;
use crate::common::{BlockID, DbError, ReplacementStrategy, Result, TransactionID};
use crate::log_mod::LogManager;
use crate::storage::FileManager;

struct PoolState {
    block_map: HashMap<BlockID, usize>,
    // Block held by each frame, as far as the map is concerned
    frame_blocks: Vec<Option<BlockID>>,
    // Blocks being evicted or loaded; pinning one waits for the I/O to finish
    in_flight: HashSet<BlockID>,
    // Frames that never held a block
    free_list: VecDeque<usize>,
    replacer: Box<dyn ReplacementPolicy>,
}

/// Fixed set of buffer frames shared by all transactions. At most one frame
/// holds a given block, and a pinned frame is never reassigned.
pub struct BufferManager {
    frames: Vec<Arc<BufferFrame>>,
    pool: Mutex<PoolState>,
    // Signalled when a frame is unpinned or a load finishes
    frame_released: Condvar,
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    pin_timeout: Duration,
}

impl BufferManager {
    pub fn new(
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        capacity: usize,
        strategy: ReplacementStrategy,
        pin_timeout: Duration,
    ) -> Self {
        let block_size = file_manager.block_size();
        let frames = (0..capacity)
            .map(|id| Arc::new(BufferFrame::new(id, block_size)))
            .collect();

        Self {
            frames,
            pool: Mutex::new(PoolState {
                block_map: HashMap::with_capacity(capacity),
                frame_blocks: vec![None; capacity],
                in_flight: HashSet::new(),
                free_list: (0..capacity).collect(),
                replacer: make_replacer(strategy, capacity),
            }),
            frame_released: Condvar::new(),
            file_manager,
            log_manager,
            pin_timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    /// Number of frames nobody has pinned.
    pub fn available(&self) -> usize {
        self.frames.iter().filter(|f| !f.is_pinned()).count()
    }

    /// Pins the frame holding `block`, loading the block if it is not cached.
    /// Waits up to the pin timeout for a frame to be unpinned when every frame
    /// is in use. Disk I/O happens outside the pool mutex.
    pub fn pin(&self, block: &BlockID) -> Result<Arc<BufferFrame>> {
        let deadline = Instant::now() + self.pin_timeout;
        let mut pool = self.pool.lock();

        let (idx, old_block) = loop {
            if !pool.in_flight.contains(block) {
                // Fast path: block already in a frame
                if let Some(&idx) = pool.block_map.get(block) {
                    let frame = &self.frames[idx];
                    frame.pin();
                    pool.replacer.record_access(idx);
                    return Ok(Arc::clone(frame));
                }

                if let Some(idx) = self.choose_frame(&mut pool) {
                    break (idx, self.reserve(&mut pool, idx, block));
                }
            }

            if self.frame_released.wait_until(&mut pool, deadline).timed_out() {
                warn!("no buffer frame became available for {} within {:?}", block, self.pin_timeout);
                return Err(DbError::BufferPoolFull);
            }
        };
        drop(pool);

        let frame = &self.frames[idx];
        let loaded = frame.load(block, &self.file_manager, &self.log_manager);

        let mut pool = self.pool.lock();
        pool.in_flight.remove(block);
        if let Some(old) = &old_block {
            pool.in_flight.remove(old);
        }
        let result = match loaded {
            Ok(()) => {
                if let Some(old) = &old_block {
                    debug!("frame {} evicts {} for {}", idx, old, block);
                }
                pool.block_map.insert(block.clone(), idx);
                pool.frame_blocks[idx] = Some(block.clone());
                pool.replacer.record_access(idx);
                Ok(Arc::clone(frame))
            }
            Err(e) => {
                // Undo the reservation: the frame still holds its old block
                match &old_block {
                    Some(old) => {
                        pool.block_map.insert(old.clone(), idx);
                    }
                    None => pool.free_list.push_back(idx),
                }
                pool.frame_blocks[idx] = old_block;
                frame.unpin();
                Err(e)
            }
        };
        self.frame_released.notify_all();
        result
    }

    // Claims frame `idx` for `block` under the pool lock. The frame is pinned
    // so it cannot be chosen again, and both its old block and `block` are
    // marked in flight until the load finishes.
    fn reserve(&self, pool: &mut PoolState, idx: usize, block: &BlockID) -> Option<BlockID> {
        self.frames[idx].pin();
        pool.free_list.retain(|&f| f != idx);
        let old_block = pool.frame_blocks[idx].take();
        if let Some(old) = &old_block {
            pool.block_map.remove(old);
            pool.in_flight.insert(old.clone());
        }
        pool.in_flight.insert(block.clone());
        old_block
    }

    pub fn unpin(&self, frame: &BufferFrame) {
        if frame.unpin() == 0 {
            // Take the pool lock so a pinner cannot miss the wakeup between its
            // check and its wait
            let _pool = self.pool.lock();
            self.frame_released.notify_all();
        }
    }

    /// Runs `f` with `block` pinned and unpins afterwards, also on error.
    pub fn with_pinned<T>(&self, block: &BlockID, f: impl FnOnce(&BufferFrame) -> Result<T>) -> Result<T> {
        let frame = self.pin(block)?;
        let result = f(&frame);
        self.unpin(&frame);
        result
    }

    pub fn flush(&self, frame: &BufferFrame) -> Result<()> {
        frame.flush(&self.file_manager, &self.log_manager)
    }

    /// Flushes every frame last modified by `tx`.
    pub fn flush_all(&self, tx: TransactionID) -> Result<()> {
        for frame in &self.frames {
            if frame.modifying_tx() == Some(tx) {
                self.flush(frame)?;
            }
        }
        Ok(())
    }

    pub fn flush_all_dirty(&self) -> Result<()> {
        for frame in &self.frames {
            self.flush(frame)?;
        }
        Ok(())
    }

    // Callers hold the pool lock, so no frame can get pinned under our feet
    fn choose_frame(&self, pool: &mut PoolState) -> Option<usize> {
        if let Some(idx) = pool.free_list.front().copied() {
            return Some(idx);
        }
        let frames = &self.frames;
        pool.replacer.victim(&|idx| !frames[idx].is_pinned())
    }
}
