use smrlog_types::{LogPosition, TransactionBatch};

use crate::error::ObjectResult;

/// Decides, at replay time, whether a transaction batch committed.
///
/// Every replica must reach the same verdict for the same position, so
/// implementations decide from the log alone (plus the batch's recorded
/// conflict metadata), never from local replica state.
pub trait AbortOracle: Send + Sync {
    fn is_aborted(&self, position: LogPosition, batch: &TransactionBatch) -> ObjectResult<bool>;
}

/// Oracle for logs without conflict detection: every batch commits.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitAll;

impl AbortOracle for CommitAll {
    fn is_aborted(&self, _position: LogPosition, _batch: &TransactionBatch) -> ObjectResult<bool> {
        Ok(false)
    }
}
