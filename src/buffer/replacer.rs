use std::collections::VecDeque;

use crate::common::ReplacementStrategy;

/// Chooses which unpinned frame gives up its block. The buffer manager owns
/// the policy behind its pool mutex, so implementations need no locking.
pub trait ReplacementPolicy: Send {
    /// Called every time `frame` is pinned.
    fn record_access(&mut self, frame: usize);

    /// Picks a frame for which `evictable` holds, or None if there is none.
    fn victim(&mut self, evictable: &dyn Fn(usize) -> bool) -> Option<usize>;
}

pub fn make_replacer(strategy: ReplacementStrategy, pool_size: usize) -> Box<dyn ReplacementPolicy> {
    match strategy {
        ReplacementStrategy::FirstFit => Box::new(FirstFitReplacer::new(pool_size)),
        ReplacementStrategy::Lru => Box::new(LruReplacer::new(pool_size)),
        ReplacementStrategy::Clock => Box::new(ClockReplacer::new(pool_size)),
    }
}

/// First unpinned frame in index order.
pub struct FirstFitReplacer {
    pool_size: usize,
}

impl FirstFitReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self { pool_size }
    }
}

impl ReplacementPolicy for FirstFitReplacer {
    fn record_access(&mut self, _frame: usize) {}

    fn victim(&mut self, evictable: &dyn Fn(usize) -> bool) -> Option<usize> {
        (0..self.pool_size).find(|&frame| evictable(frame))
    }
}

/// Least recently pinned frame goes first.
pub struct LruReplacer {
    // front = most recently used
    lru_list: VecDeque<usize>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            lru_list: (0..pool_size).collect(),
        }
    }
}

impl ReplacementPolicy for LruReplacer {
    fn record_access(&mut self, frame: usize) {
        if let Some(pos) = self.lru_list.iter().position(|&id| id == frame) {
            self.lru_list.remove(pos);
        }
        self.lru_list.push_front(frame);
    }

    fn victim(&mut self, evictable: &dyn Fn(usize) -> bool) -> Option<usize> {
        self.lru_list.iter().rev().copied().find(|&frame| evictable(frame))
    }
}

/// Second-chance clock over the frame array.
pub struct ClockReplacer {
    referenced: Vec<bool>,
    hand: usize,
}

impl ClockReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            referenced: vec![false; pool_size],
            hand: 0,
        }
    }
}

impl ReplacementPolicy for ClockReplacer {
    fn record_access(&mut self, frame: usize) {
        if let Some(bit) = self.referenced.get_mut(frame) {
            *bit = true;
        }
    }

    fn victim(&mut self, evictable: &dyn Fn(usize) -> bool) -> Option<usize> {
        let n = self.referenced.len();
        // Two sweeps: the first may only clear reference bits
        for _ in 0..2 * n {
            let frame = self.hand;
            self.hand = (self.hand + 1) % n;
            if !evictable(frame) {
                continue;
            }
            if self.referenced[frame] {
                self.referenced[frame] = false;
            } else {
                return Some(frame);
            }
        }
        None
    }
}
