mod buffer_frame;
mod buffer_manager;
mod replacer;

pub use buffer_frame::BufferFrame;
pub use buffer_manager::BufferManager;
pub use replacer::{make_replacer, ClockReplacer, FirstFitReplacer, LruReplacer, ReplacementPolicy};
