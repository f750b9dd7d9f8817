mod checkpoint_manager;
mod recovery_manager;

pub use checkpoint_manager::CheckpointManager;
pub use recovery_manager::{RecoveryManager, RecoveryReport};
