#[allow(clippy::module_inception)]
mod transaction;
mod transaction_manager;

pub use transaction::{Transaction, TransactionState};
pub use transaction_manager::{TransactionManager, TransactionRegistry};
