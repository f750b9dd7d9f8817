mod deadlock_detector;
mod isolation;
#[allow(clippy::module_inception)]
mod lock;
mod lock_manager;
mod lock_table;
mod wait_for_graph;

pub use deadlock_detector::{victim_strategy, DeadlockDetector, OldestVictim, VictimStrategy, YoungestVictim};
pub use isolation::IsolationLevel;
pub use lock::{Lock, LockMode};
pub use lock_manager::LockManager;
pub use lock_table::LockTable;
pub use wait_for_graph::WaitForGraph;
