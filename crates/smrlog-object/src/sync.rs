use std::time::{Duration, Instant};

use serde_json::Value;
use smrlog_log::{LogRecord, StreamView};
use smrlog_types::{LogPayload, LogPosition, ReadBound, StreamId, UpdateEntry};
use tracing::{debug, trace};

use crate::error::{ObjectError, ObjectResult};
use crate::oracle::AbortOracle;
use crate::replica::ObjectReplica;

/// Result of one sync call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Replica version after the sync.
    pub version: Option<LogPosition>,
    /// Concrete bound the sync read up to (`Tail` resolved to a position).
    /// `None` when the log was empty.
    pub read_to: Option<LogPosition>,
    /// Records replayed by this call.
    pub records: usize,
}

enum RecordKind {
    Update,
    CommittedBatch,
    AbortedBatch,
    NonData,
}

/// How long a caller waiting for its own entry sleeps on the result slot
/// before trying the sync lock again.
const LOCK_RETRY: Duration = Duration::from_millis(5);

/// Deterministic replay of a stream onto a replica.
pub struct SyncEngine;

impl SyncEngine {
    /// Bring `replica` up to at least `target`.
    ///
    /// Mutually exclusive per replica: concurrent callers queue on the sync
    /// lock and, once inside, return immediately if the version already
    /// satisfies their target.
    pub fn sync<T>(
        replica: &ObjectReplica<T>,
        view: &StreamView,
        oracle: &dyn AbortOracle,
        target: ReadBound,
    ) -> ObjectResult<SyncOutcome> {
        let _guard = replica.lock_sync();
        Self::sync_locked(replica, view, oracle, target, None)
    }

    /// Make sure the entry appended at `position` is applied, then collect
    /// its result, all within `timeout`.
    ///
    /// While another thread holds the sync lock this waits on the result
    /// slot instead of queuing behind the lock, since that thread may apply
    /// the entry itself. Replay done here stops between records once the
    /// deadline passes. On timeout the slot stays registered, so a later
    /// [`ObjectReplica::take_result_slot`] can still collect the result.
    pub fn apply_and_take<T>(
        replica: &ObjectReplica<T>,
        view: &StreamView,
        oracle: &dyn AbortOracle,
        position: LogPosition,
        timeout: Duration,
    ) -> ObjectResult<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(_guard) = replica.try_lock_sync() {
                Self::sync_locked(replica, view, oracle, ReadBound::At(position), Some(deadline))?;
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || replica.wait_result_slot(position, remaining.min(LOCK_RETRY)) {
                break;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match replica.take_result_slot(position, remaining) {
            Err(ObjectError::TimeoutWaitingForApply { position, .. }) => {
                debug!(stream = %view.stream_id(), %position, ?timeout, "gave up waiting for apply");
                Err(ObjectError::TimeoutWaitingForApply { position, timeout })
            }
            other => other,
        }
    }

    /// State of the object at exactly `snapshot`.
    ///
    /// If the replica has not passed `snapshot` it is synced to it and
    /// cloned. Otherwise the stream is replayed from the replica's initial
    /// state, leaving the replica untouched.
    pub fn materialize_at<T: Clone>(
        replica: &ObjectReplica<T>,
        view: &StreamView,
        oracle: &dyn AbortOracle,
        snapshot: LogPosition,
    ) -> ObjectResult<T> {
        let _guard = replica.lock_sync();
        if replica.version().map_or(true, |v| v <= snapshot) {
            Self::sync_locked(replica, view, oracle, ReadBound::At(snapshot), None)?;
            return Ok(replica.get());
        }

        debug!(stream = %view.stream_id(), %snapshot, "replica is past snapshot; rebuilding");
        let table = replica.table();
        let mut state = replica.initial_state();
        for record in view.read_range(None, ReadBound::At(snapshot))? {
            let position = record.position;
            Self::replay_record(view.stream_id(), oracle, record, &mut |entry| {
                let result = table.apply(&mut state, entry);
                if let Err(error) = &result {
                    trace!(%position, %error, "entry skipped while rebuilding snapshot");
                }
                result
            })?;
        }
        Ok(state)
    }

    fn sync_locked<T>(
        replica: &ObjectReplica<T>,
        view: &StreamView,
        oracle: &dyn AbortOracle,
        target: ReadBound,
        deadline: Option<Instant>,
    ) -> ObjectResult<SyncOutcome> {
        let stream = view.stream_id();
        if target.is_satisfied_by(replica.version()) {
            return Ok(SyncOutcome {
                version: replica.version(),
                read_to: match target {
                    ReadBound::At(p) => Some(p),
                    ReadBound::Tail => None,
                },
                records: 0,
            });
        }

        // Resolving the tail first fixes the linearization point of the read.
        let bound = match target {
            ReadBound::At(p) => p,
            ReadBound::Tail => match view.tail()? {
                Some(tail) => tail,
                None => {
                    return Ok(SyncOutcome {
                        version: replica.version(),
                        read_to: None,
                        records: 0,
                    })
                }
            },
        };

        let records = view.read_range(replica.version(), ReadBound::At(bound))?;
        let mut count = 0;
        for record in records {
            let position = record.position;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!(%stream, %position, "sync deadline reached");
                break;
            }
            let kind = Self::replay_record(stream, oracle, record, &mut |entry| {
                replica.apply_entry(position, entry)
            })?;
            match kind {
                RecordKind::Update | RecordKind::CommittedBatch => {}
                RecordKind::AbortedBatch | RecordKind::NonData => {
                    replica.note_skipped();
                    replica.resolve_result_slot(
                        position,
                        Err(ObjectError::HandlerFailure {
                            operation: "<none>".into(),
                            reason: format!("no update entry was recorded at {position}"),
                        }),
                    );
                }
            }
            // Observed records advance the version even when nothing applied.
            replica.advance_to(position);
            count += 1;
        }

        debug!(%stream, target = %target, read_to = %bound, records = count, version = ?replica.version(), "sync");
        Ok(SyncOutcome {
            version: replica.version(),
            read_to: Some(bound),
            records: count,
        })
    }

    /// Feed one record to `apply`. Apply failures are already handled by the
    /// callback; only oracle failures abort the replay.
    fn replay_record(
        stream: StreamId,
        oracle: &dyn AbortOracle,
        record: LogRecord,
        apply: &mut dyn FnMut(&UpdateEntry) -> ObjectResult<Value>,
    ) -> ObjectResult<RecordKind> {
        let position = record.position;
        match record.payload {
            LogPayload::Update(entry) => {
                let _ = apply(&entry);
                Ok(RecordKind::Update)
            }
            LogPayload::Transaction(batch) => {
                if oracle.is_aborted(position, &batch)? {
                    debug!(%stream, %position, transaction = %batch.transaction, "skipping aborted batch");
                    return Ok(RecordKind::AbortedBatch);
                }
                for entry in batch.updates_for(&stream) {
                    let _ = apply(entry);
                }
                Ok(RecordKind::CommittedBatch)
            }
            LogPayload::Hole => Ok(RecordKind::NonData),
        }
    }
}
