//! Transaction coordination for smrlog objects.
//!
//! - [`TransactionManager`] begins transactions and publishes a
//!   transaction's buffered updates as one batch on the log
//! - [`ConflictOracle`] decides, from the log alone, whether a published
//!   batch committed; replicas consult the same oracle on replay and skip
//!   aborted batches
//!
//! [`connect`] wires both into an [`ObjectRuntime`].

pub mod error;
pub mod manager;
pub mod oracle;

use std::sync::Arc;

use smrlog_log::SharedLog;
use smrlog_object::{AbortOracle, ObjectConfig, ObjectRuntime};

pub use error::{TxError, TxResult};
pub use manager::{CommitOutcome, TransactionManager};
pub use oracle::{ConflictOracle, DEFAULT_MEMO_CAPACITY};

/// An object runtime with conflict detection, and the manager that commits
/// against it.
pub fn connect(log: Arc<dyn SharedLog>, config: ObjectConfig) -> (ObjectRuntime, TransactionManager) {
    let oracle: Arc<dyn AbortOracle> = Arc::new(ConflictOracle::new(Arc::clone(&log)));
    let runtime = ObjectRuntime::new(log, oracle, config);
    let manager = TransactionManager::for_runtime(&runtime);
    (runtime, manager)
}
