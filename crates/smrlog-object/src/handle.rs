use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use smrlog_log::StreamView;
use smrlog_types::{LogPosition, ReadBound, SerializerTag, StreamId, UpdateEntry};
use tracing::trace;

use crate::config::ObjectConfig;
use crate::dispatch::OperationKind;
use crate::error::{ObjectError, ObjectResult};
use crate::oracle::AbortOracle;
use crate::replica::{ApplyFailure, ObjectReplica, ReplicaStats};
use crate::sync::{SyncEngine, SyncOutcome};
use crate::transaction::{SnapshotAccess, Transaction};

/// Handle to one replicated object.
///
/// Every call goes through [`ObjectHandle::invoke`], which classifies the
/// operation with the object's dispatch table and routes it either to the
/// log (no transaction) or to the transaction's buffered view. Cloning a
/// handle shares the same replica.
///
/// Every entry the handle writes carries the handle's [`SerializerTag`].
pub struct ObjectHandle<T> {
    replica: Arc<ObjectReplica<T>>,
    view: StreamView,
    oracle: Arc<dyn AbortOracle>,
    config: ObjectConfig,
    serializer: SerializerTag,
}

impl<T> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        Self {
            replica: Arc::clone(&self.replica),
            view: self.view.clone(),
            oracle: Arc::clone(&self.oracle),
            config: self.config.clone(),
            serializer: self.serializer,
        }
    }
}

impl<T> ObjectHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        replica: Arc<ObjectReplica<T>>,
        view: StreamView,
        oracle: Arc<dyn AbortOracle>,
        config: ObjectConfig,
    ) -> Self {
        Self {
            replica,
            view,
            oracle,
            config,
            serializer: SerializerTag::default(),
        }
    }

    /// Tag every entry this handle writes with `serializer`.
    pub fn with_serializer(mut self, serializer: SerializerTag) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn serializer(&self) -> SerializerTag {
        self.serializer
    }

    pub fn stream_id(&self) -> StreamId {
        self.view.stream_id()
    }

    pub fn version(&self) -> Option<LogPosition> {
        self.replica.version()
    }

    pub fn replica(&self) -> &Arc<ObjectReplica<T>> {
        &self.replica
    }

    pub fn failures(&self) -> Vec<ApplyFailure> {
        self.replica.failures()
    }

    pub fn stats(&self) -> ReplicaStats {
        self.replica.stats()
    }

    /// Bring the replica up to at least `target`.
    pub fn sync(&self, target: ReadBound) -> ObjectResult<SyncOutcome> {
        SyncEngine::sync(&self.replica, &self.view, self.oracle.as_ref(), target)
    }

    /// Invoke `operation`, inside `tx` if one is given.
    ///
    /// Mutators return `Value::Null` once the update is appended (or
    /// buffered); they do not wait for it to be applied.
    pub fn invoke(&self, tx: Option<&Transaction>, operation: &str, args: Vec<Value>) -> ObjectResult<Value> {
        let kind = self
            .replica
            .table()
            .kind(operation)
            .ok_or_else(|| ObjectError::UnknownOperation {
                operation: operation.to_string(),
            })?;
        trace!(stream = %self.stream_id(), operation, %kind, in_tx = tx.is_some(), "invoke");

        match (kind, tx) {
            (OperationKind::Accessor, None) => self.access(operation, &args),
            (OperationKind::Accessor, Some(tx)) => self.access_in(tx, operation, &args),
            (OperationKind::Mutator, None) => {
                self.view.write(self.entry(operation, args))?;
                Ok(Value::Null)
            }
            (OperationKind::Mutator, Some(tx)) => {
                self.mutate_in(tx, self.entry(operation, args), false)?;
                Ok(Value::Null)
            }
            (OperationKind::MutatorAccessor, None) => self.mutate_access(self.entry(operation, args)),
            (OperationKind::MutatorAccessor, Some(tx)) => {
                self.mutate_in(tx, self.entry(operation, args), true)
            }
        }
    }

    /// [`invoke`](Self::invoke), decoding the result as `R`.
    pub fn invoke_as<R: DeserializeOwned>(
        &self,
        tx: Option<&Transaction>,
        operation: &str,
        args: Vec<Value>,
    ) -> ObjectResult<R> {
        let value = self.invoke(tx, operation, args)?;
        serde_json::from_value(value).map_err(|e| ObjectError::Serialization(e.to_string()))
    }

    fn entry(&self, operation: &str, args: Vec<Value>) -> UpdateEntry {
        UpdateEntry::new(operation, args).with_serializer(self.serializer)
    }

    /// Linearized read: sync to the tail observed now, then read.
    fn access(&self, operation: &str, args: &[Value]) -> ObjectResult<Value> {
        self.sync(ReadBound::Tail)?;
        self.replica
            .read(|state| self.replica.table().read(state, operation, args))
    }

    /// Append with a result slot, then collect the applied result, which may
    /// have been produced by another thread's sync. Bounded by
    /// `apply_timeout`.
    fn mutate_access(&self, entry: UpdateEntry) -> ObjectResult<Value> {
        let replica = &self.replica;
        let position = self.view.write_with_callback(
            entry,
            &|p| replica.allocate_result_slot(p),
            &|p| replica.discard_result_slot(p),
        )?;
        SyncEngine::apply_and_take(
            replica,
            &self.view,
            self.oracle.as_ref(),
            position,
            self.config.apply_timeout,
        )
    }

    fn access_in(&self, tx: &Transaction, operation: &str, args: &[Value]) -> ObjectResult<Value> {
        let snapshot = self.ensure_snapshot_synced(tx)?;
        tx.record_read(self.stream_id());
        let table = Arc::clone(self.replica.table());
        tx.with_shadow(
            self.stream_id(),
            || self.materialize(snapshot),
            |state: &mut T| table.read(state, operation, args),
        )?
    }

    /// Apply `entry` to the transaction's view and buffer it for commit.
    ///
    /// The handler runs on a copy of the view, which replaces the view only
    /// if the handler succeeds.
    fn mutate_in(&self, tx: &Transaction, entry: UpdateEntry, reads: bool) -> ObjectResult<Value> {
        let snapshot = self.ensure_snapshot_synced(tx)?;
        if reads {
            tx.record_read(self.stream_id());
        }
        let table = Arc::clone(self.replica.table());
        let value = tx.with_shadow(
            self.stream_id(),
            || self.materialize(snapshot),
            |state: &mut T| -> ObjectResult<Value> {
                let mut next = state.clone();
                let value = table.apply(&mut next, &entry)?;
                *state = next;
                Ok(value)
            },
        )??;
        tx.buffer_update(self.stream_id(), entry)?;
        Ok(value)
    }

    /// Fix the transaction's snapshot on its first access; afterwards keep
    /// this replica synced to exactly that snapshot.
    pub fn ensure_snapshot_synced(&self, tx: &Transaction) -> ObjectResult<Option<LogPosition>> {
        match tx.begin_access()? {
            SnapshotAccess::First => match self.sync(ReadBound::Tail) {
                Ok(outcome) => {
                    let snapshot = tx.finish_first_access(outcome.read_to);
                    trace!(transaction = %tx.id(), stream = %self.stream_id(), ?snapshot, "snapshot fixed");
                    Ok(snapshot)
                }
                Err(e) => {
                    tx.abandon_first_access();
                    Err(e)
                }
            },
            SnapshotAccess::Fixed(Some(snapshot)) => {
                self.sync(ReadBound::At(snapshot))?;
                Ok(Some(snapshot))
            }
            SnapshotAccess::Fixed(None) => Ok(None),
        }
    }

    fn materialize(&self, snapshot: Option<LogPosition>) -> ObjectResult<T> {
        match snapshot {
            Some(snapshot) => {
                SyncEngine::materialize_at(&self.replica, &self.view, self.oracle.as_ref(), snapshot)
            }
            None => Ok(self.replica.initial_state()),
        }
    }
}

impl<T> std::fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("replica", &self.replica)
            .finish()
    }
}
