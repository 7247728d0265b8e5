use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smrlog_types::{LogPosition, StreamId, UpdateEntry};
use tracing::{trace, warn};

use crate::dispatch::DispatchTable;
use crate::error::{ObjectError, ObjectResult};
use crate::slot::PendingResults;

/// A log entry this replica observed but could not apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyFailure {
    pub position: LogPosition,
    pub operation: String,
    pub error: ObjectError,
}

/// Replay counters for one replica.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStats {
    /// Update entries applied successfully.
    pub applied: u64,
    /// Update entries that failed to apply.
    pub failed: u64,
    /// Records observed but not applied: aborted batches and holes.
    pub skipped: u64,
}

/// Builds an object's state before any log record is applied.
pub type InitFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// One object's materialized state.
///
/// The state is mutated only by the sync engine, which holds the replica's
/// sync lock while replaying. `version` is the position of the last log
/// record this replica has observed and never moves backwards.
pub struct ObjectReplica<T> {
    stream: StreamId,
    table: Arc<DispatchTable<T>>,
    initial: InitFn<T>,
    state: RwLock<T>,
    /// Last observed position plus one; zero means never synced.
    version: AtomicU64,
    sync_lock: Mutex<()>,
    pending: PendingResults,
    failures: Mutex<VecDeque<ApplyFailure>>,
    max_failures: usize,
    applied: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl<T> ObjectReplica<T> {
    /// A replica whose state starts as `initial()`. Every rebuild of the
    /// object from the start of its stream starts from the same value.
    pub fn new(
        stream: StreamId,
        table: Arc<DispatchTable<T>>,
        initial: InitFn<T>,
        max_failures: usize,
    ) -> Self {
        Self {
            stream,
            table,
            state: RwLock::new(initial()),
            initial,
            version: AtomicU64::new(0),
            sync_lock: Mutex::new(()),
            pending: PendingResults::new(),
            failures: Mutex::new(VecDeque::new()),
            max_failures,
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream
    }

    /// A fresh copy of the state before the first log record.
    pub fn initial_state(&self) -> T {
        (self.initial)()
    }

    pub fn table(&self) -> &Arc<DispatchTable<T>> {
        &self.table
    }

    /// Position of the last observed record, or `None` if never synced.
    pub fn version(&self) -> Option<LogPosition> {
        self.version
            .load(Ordering::Acquire)
            .checked_sub(1)
            .map(LogPosition::new)
    }

    /// Run `f` against the current state without syncing.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.read().expect("replica lock poisoned"))
    }

    /// Snapshot of the current state without syncing.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.read(T::clone)
    }

    /// Apply one update entry at `position`.
    ///
    /// A failing entry resolves the pending slot at `position` (if any) with
    /// the error, is recorded, and does not stop replay of later entries.
    pub(crate) fn apply_entry(&self, position: LogPosition, entry: &UpdateEntry) -> ObjectResult<Value> {
        let result = {
            let mut state = self.state.write().expect("replica lock poisoned");
            self.table.apply(&mut state, entry)
        };

        match &result {
            Ok(_) => {
                trace!(stream = %self.stream, %position, operation = %entry.operation, "applied");
                self.applied.fetch_add(1, Ordering::Relaxed);
                self.advance_to(position);
            }
            Err(error) => {
                warn!(
                    stream = %self.stream,
                    %position,
                    operation = %entry.operation,
                    %error,
                    "failed to apply entry; continuing replay"
                );
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.record_failure(ApplyFailure {
                    position,
                    operation: entry.operation.clone(),
                    error: error.clone(),
                });
            }
        }

        self.pending.resolve(position, result.clone());
        result
    }

    /// Move `version` forward to `position`; never moves it backwards.
    pub(crate) fn advance_to(&self, position: LogPosition) {
        self.version.fetch_max(position.get() + 1, Ordering::AcqRel);
    }

    pub(crate) fn note_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lock_sync(&self) -> MutexGuard<'_, ()> {
        self.sync_lock.lock().expect("sync lock poisoned")
    }

    /// The sync lock, unless another thread is replaying right now.
    pub(crate) fn try_lock_sync(&self) -> Option<MutexGuard<'_, ()>> {
        match self.sync_lock.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => panic!("sync lock poisoned"),
        }
    }

    /// Block until the slot at `position` is resolved or `timeout` elapses.
    pub(crate) fn wait_result_slot(&self, position: LogPosition, timeout: Duration) -> bool {
        self.pending.wait(position, timeout)
    }

    pub fn allocate_result_slot(&self, position: LogPosition) {
        self.pending.allocate(position);
    }

    pub fn resolve_result_slot(&self, position: LogPosition, result: ObjectResult<Value>) -> bool {
        self.pending.resolve(position, result)
    }

    pub fn discard_result_slot(&self, position: LogPosition) {
        self.pending.discard(position);
    }

    pub fn take_result_slot(&self, position: LogPosition, timeout: Duration) -> ObjectResult<Value> {
        self.pending.take(position, timeout)
    }

    pub fn pending_results(&self) -> usize {
        self.pending.len()
    }

    /// Most recent apply failures, oldest first.
    pub fn failures(&self) -> Vec<ApplyFailure> {
        self.failures
            .lock()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> ReplicaStats {
        ReplicaStats {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, failure: ApplyFailure) {
        if self.max_failures == 0 {
            return;
        }
        let mut failures = self.failures.lock().expect("lock poisoned");
        if failures.len() == self.max_failures {
            failures.pop_front();
        }
        failures.push_back(failure);
    }
}

impl<T> std::fmt::Debug for ObjectReplica<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReplica")
            .field("stream", &self.stream)
            .field("type", &self.table.type_name())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::args::{arg, to_value};

    fn replica(max_failures: usize) -> ObjectReplica<i64> {
        let table = DispatchTable::builder("counter")
            .accessor("get", |n: &i64, _| to_value(*n))
            .mutator("add", |n: &mut i64, args| {
                *n += arg::<i64>(args, 0)?;
                Ok(())
            })
            .mutator_accessor("increment", |n: &mut i64, _| {
                *n += 1;
                to_value(*n)
            })
            .build()
            .unwrap();
        ObjectReplica::new(StreamId::named("counter"), Arc::new(table), Arc::new(|| 0), max_failures)
    }

    #[test]
    fn new_replica_is_unsynced_and_empty() {
        let r = replica(4);
        assert_eq!(r.version(), None);
        assert_eq!(r.get(), 0);
        assert_eq!(r.stats(), ReplicaStats::default());
    }

    #[test]
    fn apply_advances_version_and_resolves_slot() {
        let r = replica(4);
        let pos = LogPosition::new(3);
        r.allocate_result_slot(pos);
        let value = r.apply_entry(pos, &UpdateEntry::new("increment", vec![])).unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(r.version(), Some(pos));
        assert_eq!(r.take_result_slot(pos, Duration::from_secs(1)).unwrap(), json!(1));
        assert_eq!(r.pending_results(), 0);
    }

    #[test]
    fn failed_apply_is_recorded_and_delivered() {
        let r = replica(4);
        let pos = LogPosition::new(0);
        r.allocate_result_slot(pos);
        let err = r
            .apply_entry(pos, &UpdateEntry::new("explode", vec![]))
            .unwrap_err();
        assert!(matches!(err, ObjectError::UnknownOperation { .. }));
        assert_eq!(r.take_result_slot(pos, Duration::from_secs(1)).unwrap_err(), err);

        let failures = r.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "explode");
        assert_eq!(r.stats().failed, 1);
        assert_eq!(r.get(), 0);
    }

    #[test]
    fn failure_log_is_bounded() {
        let r = replica(2);
        for p in 0..5 {
            let _ = r.apply_entry(LogPosition::new(p), &UpdateEntry::new("add", vec![json!("x")]));
        }
        let positions: Vec<u64> = r.failures().iter().map(|f| f.position.get()).collect();
        assert_eq!(positions, vec![3, 4]);
        assert_eq!(r.stats().failed, 5);
    }

    #[test]
    fn initial_state_is_rebuilt_on_demand() {
        let table = Arc::new(DispatchTable::<i64>::builder("counter").build().unwrap());
        let r = ObjectReplica::new(StreamId::named("seeded"), table, Arc::new(|| 42), 0);
        assert_eq!(r.get(), 42);
        assert_eq!(r.initial_state(), 42);
    }

    #[test]
    fn version_never_regresses() {
        let r = replica(0);
        r.advance_to(LogPosition::new(10));
        r.advance_to(LogPosition::new(4));
        assert_eq!(r.version(), Some(LogPosition::new(10)));
    }
}
