use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use smrlog_types::{LogPosition, StreamId, TransactionBatch, TransactionId, UpdateEntry};

use crate::error::{ObjectError, ObjectResult};

/// Lifecycle of a transaction.
///
/// `NotStarted → FirstAccess → Active → Committing → Committed | Aborted`.
/// Buffered writes are only legal while `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionPhase {
    NotStarted,
    /// The first object access is syncing to fix the snapshot.
    FirstAccess,
    Active,
    Committing,
    Committed,
    Aborted,
}

impl TransactionPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::FirstAccess => "syncing its first access",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// What an object access must do to honor the transaction's snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SnapshotAccess {
    /// No snapshot yet: sync to the tail and fix the snapshot there.
    First,
    /// Snapshot already fixed; `None` means the log was empty.
    Fixed(Option<LogPosition>),
}

struct TxState {
    phase: TransactionPhase,
    snapshot: Option<LogPosition>,
    first_access_done: bool,
    sync_in_progress: bool,
    buffered: Vec<(StreamId, UpdateEntry)>,
    read_set: BTreeSet<StreamId>,
    /// Transaction-local view of every object touched, keyed by stream.
    shadows: HashMap<StreamId, Box<dyn Any + Send>>,
}

/// Explicit transaction context passed to every object call made inside it.
///
/// Holds the snapshot position fixed by the first access, the updates
/// buffered so far, the set of streams read, and one shadow copy per object
/// that reflects this transaction's own writes.
pub struct Transaction {
    id: TransactionId,
    inner: Mutex<TxState>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            inner: Mutex::new(TxState {
                phase: TransactionPhase::NotStarted,
                snapshot: None,
                first_access_done: false,
                sync_in_progress: false,
                buffered: Vec::new(),
                read_set: BTreeSet::new(),
                shadows: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn phase(&self) -> TransactionPhase {
        self.lock().phase
    }

    /// Snapshot position, once the first access has fixed it.
    pub fn snapshot(&self) -> Option<LogPosition> {
        self.lock().snapshot
    }

    pub fn first_access_done(&self) -> bool {
        self.lock().first_access_done
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.lock().sync_in_progress
    }

    pub fn read_set(&self) -> BTreeSet<StreamId> {
        self.lock().read_set.clone()
    }

    pub fn buffered_updates(&self) -> Vec<(StreamId, UpdateEntry)> {
        self.lock().buffered.clone()
    }

    /// Move to `Committing` and package the buffered updates.
    ///
    /// Returns `None` for a transaction with no writes, which commits
    /// immediately without touching the log.
    pub fn begin_commit(&self) -> ObjectResult<Option<TransactionBatch>> {
        let mut state = self.lock();
        match state.phase {
            TransactionPhase::NotStarted | TransactionPhase::Active => {}
            phase => return Err(self.not_active(phase)),
        }

        if state.buffered.is_empty() {
            state.phase = TransactionPhase::Committed;
            state.shadows.clear();
            return Ok(None);
        }

        let mut updates: BTreeMap<StreamId, Vec<UpdateEntry>> = BTreeMap::new();
        for (stream, entry) in &state.buffered {
            updates.entry(*stream).or_default().push(entry.clone());
        }
        state.phase = TransactionPhase::Committing;
        Ok(Some(TransactionBatch {
            transaction: self.id,
            snapshot: state.snapshot,
            read_set: state.read_set.clone(),
            updates,
        }))
    }

    pub fn mark_committed(&self) {
        self.finish(TransactionPhase::Committed);
    }

    /// Discard buffered updates and shadow views.
    pub fn mark_aborted(&self) {
        self.finish(TransactionPhase::Aborted);
    }

    fn finish(&self, phase: TransactionPhase) {
        let mut state = self.lock();
        state.phase = phase;
        state.buffered.clear();
        state.shadows.clear();
    }

    pub(crate) fn begin_access(&self) -> ObjectResult<SnapshotAccess> {
        let mut state = self.lock();
        match state.phase {
            TransactionPhase::Active => Ok(SnapshotAccess::Fixed(state.snapshot)),
            TransactionPhase::NotStarted | TransactionPhase::FirstAccess => {
                state.phase = TransactionPhase::FirstAccess;
                state.sync_in_progress = true;
                Ok(SnapshotAccess::First)
            }
            phase => Err(self.not_active(phase)),
        }
    }

    /// Fix the snapshot after the first sync. Returns the fixed snapshot,
    /// which is the earlier one if another access won the race.
    pub(crate) fn finish_first_access(&self, snapshot: Option<LogPosition>) -> Option<LogPosition> {
        let mut state = self.lock();
        if !state.first_access_done {
            state.snapshot = snapshot;
            state.first_access_done = true;
        }
        state.sync_in_progress = false;
        if state.phase == TransactionPhase::FirstAccess {
            state.phase = TransactionPhase::Active;
        }
        state.snapshot
    }

    pub(crate) fn abandon_first_access(&self) {
        let mut state = self.lock();
        state.sync_in_progress = false;
        if state.phase == TransactionPhase::FirstAccess && !state.first_access_done {
            state.phase = TransactionPhase::NotStarted;
        }
    }

    pub(crate) fn record_read(&self, stream: StreamId) {
        self.lock().read_set.insert(stream);
    }

    pub(crate) fn buffer_update(&self, stream: StreamId, entry: UpdateEntry) -> ObjectResult<()> {
        let mut state = self.lock();
        if state.phase != TransactionPhase::Active {
            return Err(self.not_active(state.phase));
        }
        state.buffered.push((stream, entry));
        Ok(())
    }

    /// Run `f` against this transaction's view of `stream`, creating the
    /// view with `init` on first use.
    pub(crate) fn with_shadow<S, R>(
        &self,
        stream: StreamId,
        init: impl FnOnce() -> ObjectResult<S>,
        f: impl FnOnce(&mut S) -> R,
    ) -> ObjectResult<R>
    where
        S: Send + 'static,
    {
        let mut state = self.lock();
        if !state.shadows.contains_key(&stream) {
            let initial = init()?;
            state.shadows.insert(stream, Box::new(initial));
        }
        let shadow = state
            .shadows
            .get_mut(&stream)
            .and_then(|boxed| boxed.downcast_mut::<S>())
            .ok_or(ObjectError::ShadowTypeMismatch { stream })?;
        Ok(f(shadow))
    }

    fn not_active(&self, phase: TransactionPhase) -> ObjectError {
        ObjectError::TransactionNotActive {
            transaction: self.id,
            phase,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TxState> {
        self.inner.lock().expect("transaction lock poisoned")
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("phase", &state.phase)
            .field("snapshot", &state.snapshot)
            .field("buffered", &state.buffered.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_access_fixes_snapshot_once() {
        let tx = Transaction::new();
        assert_eq!(tx.begin_access().unwrap(), SnapshotAccess::First);
        assert!(tx.is_sync_in_progress());
        assert_eq!(tx.phase(), TransactionPhase::FirstAccess);

        assert_eq!(
            tx.finish_first_access(Some(LogPosition::new(5))),
            Some(LogPosition::new(5))
        );
        assert!(!tx.is_sync_in_progress());
        assert!(tx.first_access_done());
        assert_eq!(tx.phase(), TransactionPhase::Active);
        assert_eq!(
            tx.begin_access().unwrap(),
            SnapshotAccess::Fixed(Some(LogPosition::new(5)))
        );
    }

    #[test]
    fn failed_first_access_can_be_retried() {
        let tx = Transaction::new();
        tx.begin_access().unwrap();
        tx.abandon_first_access();
        assert_eq!(tx.phase(), TransactionPhase::NotStarted);
        assert_eq!(tx.begin_access().unwrap(), SnapshotAccess::First);
    }

    #[test]
    fn writes_require_active_phase() {
        let tx = Transaction::new();
        let err = tx
            .buffer_update(StreamId::named("s"), UpdateEntry::new("put", vec![]))
            .unwrap_err();
        assert!(matches!(
            err,
            ObjectError::TransactionNotActive {
                phase: TransactionPhase::NotStarted,
                ..
            }
        ));
    }

    #[test]
    fn begin_commit_groups_updates_per_stream_in_call_order() {
        let tx = Transaction::new();
        tx.begin_access().unwrap();
        tx.finish_first_access(Some(LogPosition::new(2)));
        let a = StreamId::named("a");
        let b = StreamId::named("b");
        tx.record_read(b);
        tx.buffer_update(a, UpdateEntry::new("put", vec![json!(1)])).unwrap();
        tx.buffer_update(b, UpdateEntry::new("put", vec![json!(2)])).unwrap();
        tx.buffer_update(a, UpdateEntry::new("put", vec![json!(3)])).unwrap();

        let batch = tx.begin_commit().unwrap().unwrap();
        assert_eq!(tx.phase(), TransactionPhase::Committing);
        assert_eq!(batch.transaction, tx.id());
        assert_eq!(batch.snapshot, Some(LogPosition::new(2)));
        assert_eq!(batch.read_set, BTreeSet::from([b]));
        let a_args: Vec<_> = batch.updates_for(&a).iter().map(|e| e.arguments[0].clone()).collect();
        assert_eq!(a_args, vec![json!(1), json!(3)]);

        tx.mark_committed();
        assert!(tx.buffered_updates().is_empty());
        assert!(tx.begin_commit().is_err());
    }

    #[test]
    fn read_only_commit_skips_the_log() {
        let tx = Transaction::new();
        assert_eq!(tx.begin_commit().unwrap(), None);
        assert_eq!(tx.phase(), TransactionPhase::Committed);
    }

    #[test]
    fn shadow_is_created_once_and_type_checked() {
        let tx = Transaction::new();
        let s = StreamId::named("s");
        tx.with_shadow(s, || Ok(10i64), |n| *n += 1).unwrap();
        let seen = tx
            .with_shadow(s, || -> ObjectResult<i64> { panic!("created twice") }, |n| *n)
            .unwrap();
        assert_eq!(seen, 11);

        let err = tx.with_shadow(s, || Ok(String::new()), |_| ()).unwrap_err();
        assert_eq!(err, ObjectError::ShadowTypeMismatch { stream: s });
    }

    #[test]
    fn abort_discards_buffers() {
        let tx = Transaction::new();
        tx.begin_access().unwrap();
        tx.finish_first_access(None);
        tx.buffer_update(StreamId::named("s"), UpdateEntry::new("put", vec![]))
            .unwrap();
        tx.mark_aborted();
        assert_eq!(tx.phase(), TransactionPhase::Aborted);
        assert!(tx.buffered_updates().is_empty());
        assert!(tx.begin_access().is_err());
    }
}
