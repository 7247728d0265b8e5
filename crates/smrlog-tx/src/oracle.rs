use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use smrlog_log::SharedLog;
use smrlog_object::{AbortOracle, ObjectResult};
use smrlog_types::{LogPayload, LogPosition, ReadBound, TransactionBatch};
use tracing::{debug, trace};

/// Read-set/write-set conflict detection, decided from the log alone.
///
/// A batch at position `p` taken at snapshot `s` aborts iff some stream in
/// its read set or write set has a committed data record in `(s, p)`. Plain
/// updates always count; an earlier batch counts only if it did not abort
/// itself. Records at or before the snapshot were visible to the
/// transaction and never conflict.
///
/// Decisions are deterministic, so every replica reaches the same verdict.
/// The most recent `capacity` decisions are memoized per position; an
/// evicted position is decided again from the log if asked about.
pub struct ConflictOracle {
    log: Arc<dyn SharedLog>,
    capacity: usize,
    decided: Mutex<BTreeMap<LogPosition, bool>>,
}

/// Memoized decisions kept by [`ConflictOracle::new`].
pub const DEFAULT_MEMO_CAPACITY: usize = 4096;

impl ConflictOracle {
    pub fn new(log: Arc<dyn SharedLog>) -> Self {
        Self::with_capacity(log, DEFAULT_MEMO_CAPACITY)
    }

    pub fn with_capacity(log: Arc<dyn SharedLog>, capacity: usize) -> Self {
        Self {
            log,
            capacity: capacity.max(1),
            decided: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of memoized decisions.
    pub fn decided(&self) -> usize {
        self.decided.lock().expect("lock poisoned").len()
    }

    fn cached(&self, position: LogPosition) -> Option<bool> {
        self.decided
            .lock()
            .expect("lock poisoned")
            .get(&position)
            .copied()
    }

    fn decide(&self, position: LogPosition, batch: &TransactionBatch) -> ObjectResult<bool> {
        let Some(last) = position.prev() else {
            return Ok(false);
        };
        if batch.snapshot.is_some_and(|s| s >= last) {
            return Ok(false);
        }
        let upper = ReadBound::At(last);

        for stream in batch.conflict_set() {
            for record in self.log.read_stream(&stream, batch.snapshot, upper)? {
                let conflicting = match &record.payload {
                    LogPayload::Update(_) => true,
                    LogPayload::Transaction(earlier) => !self.is_aborted(record.position, earlier)?,
                    LogPayload::Hole => false,
                };
                if conflicting {
                    debug!(
                        transaction = %batch.transaction,
                        %position,
                        %stream,
                        conflict = %record.position,
                        "transaction batch aborted"
                    );
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl AbortOracle for ConflictOracle {
    fn is_aborted(&self, position: LogPosition, batch: &TransactionBatch) -> ObjectResult<bool> {
        if let Some(aborted) = self.cached(position) {
            return Ok(aborted);
        }
        let aborted = self.decide(position, batch)?;
        trace!(%position, aborted, "conflict decision");
        let mut decided = self.decided.lock().expect("lock poisoned");
        decided.insert(position, aborted);
        // Replicas ask about positions in log order, so the oldest go first.
        while decided.len() > self.capacity {
            decided.pop_first();
        }
        Ok(aborted)
    }
}

impl std::fmt::Debug for ConflictOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictOracle")
            .field("capacity", &self.capacity)
            .field("decided", &self.decided())
            .finish()
    }
}
