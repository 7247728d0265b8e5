use std::sync::Arc;

use smrlog_log::SharedLog;
use smrlog_object::{AbortOracle, ObjectRuntime, Transaction};
use smrlog_types::{LogPayload, LogPosition};
use tracing::{debug, warn};

use crate::error::{TxError, TxResult};

/// How a successful commit ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing was buffered; the log was not touched.
    ReadOnly,
    /// The batch was appended at this position and committed.
    Committed(LogPosition),
}

impl CommitOutcome {
    pub fn position(&self) -> Option<LogPosition> {
        match self {
            Self::ReadOnly => None,
            Self::Committed(p) => Some(*p),
        }
    }
}

/// Begins, commits, and aborts transactions against a shared log.
///
/// The manager must use the same [`AbortOracle`] as the runtime whose
/// objects the transactions touch, so that the verdict returned by
/// [`commit`](Self::commit) is the one every replica reaches on replay.
#[derive(Clone)]
pub struct TransactionManager {
    log: Arc<dyn SharedLog>,
    oracle: Arc<dyn AbortOracle>,
}

impl TransactionManager {
    pub fn new(log: Arc<dyn SharedLog>, oracle: Arc<dyn AbortOracle>) -> Self {
        Self { log, oracle }
    }

    /// A manager sharing `runtime`'s log and oracle.
    pub fn for_runtime(runtime: &ObjectRuntime) -> Self {
        Self::new(Arc::clone(runtime.log()), Arc::clone(runtime.oracle()))
    }

    pub fn begin(&self) -> Transaction {
        let tx = Transaction::new();
        debug!(transaction = %tx.id(), "begin");
        tx
    }

    /// Publish the transaction's buffered updates as one batch.
    ///
    /// The batch is appended on every stream the transaction wrote, then
    /// judged at its assigned position. A conflict is reported as
    /// [`TxError::Aborted`]; the batch stays in the log and every replica
    /// skips it.
    pub fn commit(&self, tx: &Transaction) -> TxResult<CommitOutcome> {
        let Some(batch) = tx.begin_commit()? else {
            debug!(transaction = %tx.id(), "read-only commit");
            return Ok(CommitOutcome::ReadOnly);
        };

        let streams = batch.write_set();
        let payload = LogPayload::Transaction(batch.clone());
        let position = match self.log.append(&streams, &payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(transaction = %tx.id(), error = %e, "append failed; aborting");
                tx.mark_aborted();
                return Err(e.into());
            }
        };

        match self.oracle.is_aborted(position, &batch) {
            Ok(false) => {
                tx.mark_committed();
                debug!(transaction = %tx.id(), %position, streams = streams.len(), "committed");
                Ok(CommitOutcome::Committed(position))
            }
            Ok(true) => {
                tx.mark_aborted();
                debug!(transaction = %tx.id(), %position, "aborted by conflict");
                Err(TxError::Aborted {
                    transaction: tx.id(),
                    position,
                })
            }
            Err(e) => {
                warn!(transaction = %tx.id(), %position, error = %e, "conflict check failed; outcome left to replay");
                tx.mark_aborted();
                Err(e.into())
            }
        }
    }

    /// Drop the transaction's buffered updates and shadow views.
    pub fn abort(&self, tx: &Transaction) -> TxResult<()> {
        let phase = tx.phase();
        if phase.is_finished() {
            return Err(TxError::InvalidPhase {
                transaction: tx.id(),
                phase,
            });
        }
        tx.mark_aborted();
        debug!(transaction = %tx.id(), "aborted by caller");
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::{json, Value};
    use smrlog_log::InMemoryLog;
    use smrlog_object::collections::{self, Counter, SmrMap};
    use smrlog_object::{ObjectConfig, ObjectError, ObjectHandle, TransactionPhase};
    use smrlog_types::StreamId;

    use super::*;
    use crate::connect;

    fn setup() -> (Arc<InMemoryLog>, ObjectRuntime, TransactionManager) {
        let log = Arc::new(InMemoryLog::new());
        let (rt, tm) = connect(log.clone(), ObjectConfig::default());
        (log, rt, tm)
    }

    fn counter(rt: &ObjectRuntime) -> ObjectHandle<Counter> {
        rt.open(StreamId::named("counter"), Arc::new(collections::counter().unwrap()))
            .unwrap()
    }

    fn accounts(rt: &ObjectRuntime) -> ObjectHandle<SmrMap> {
        rt.open(StreamId::named("accounts"), Arc::new(collections::map().unwrap()))
            .unwrap()
    }

    fn balance(m: &ObjectHandle<SmrMap>, tx: Option<&Transaction>, who: &str) -> i64 {
        m.invoke_as::<Option<i64>>(tx, "get", vec![json!(who)])
            .unwrap()
            .unwrap_or(0)
    }

    fn transfer(m: &ObjectHandle<SmrMap>, tx: &Transaction, from: &str, to: &str, amount: i64) {
        let a = balance(m, Some(tx), from);
        let b = balance(m, Some(tx), to);
        m.invoke(Some(tx), "insert", vec![json!(from), json!(a - amount)])
            .unwrap();
        m.invoke(Some(tx), "insert", vec![json!(to), json!(b + amount)])
            .unwrap();
    }

    #[test]
    fn read_only_transaction_does_not_touch_the_log() {
        let (log, rt, tm) = setup();
        let c = counter(&rt);
        c.invoke(None, "add", vec![json!(1)]).unwrap();
        let tx = tm.begin();
        assert_eq!(c.invoke_as::<i64>(Some(&tx), "get", vec![]).unwrap(), 1);
        assert_eq!(tm.commit(&tx).unwrap(), CommitOutcome::ReadOnly);
        assert_eq!(log.len(), 1);
        assert_eq!(tx.phase(), TransactionPhase::Committed);
    }

    #[test]
    fn committed_transfer_is_visible_atomically() {
        let (log, rt, tm) = setup();
        let m = accounts(&rt);
        m.invoke(None, "insert", vec![json!("alice"), json!(100)]).unwrap();

        let tx = tm.begin();
        transfer(&m, &tx, "alice", "bob", 30);
        let outcome = tm.commit(&tx).unwrap();
        assert_eq!(outcome.position(), Some(LogPosition::new(1)));
        assert_eq!(log.len(), 2);

        // A fresh replica replays to the same state.
        let other = accounts(&rt);
        assert_eq!(balance(&other, None, "alice"), 70);
        assert_eq!(balance(&other, None, "bob"), 30);
    }

    #[test]
    fn conflicting_increments_commit_exactly_once() {
        let (_log, rt, tm) = setup();
        let c = counter(&rt);
        let t1 = tm.begin();
        let t2 = tm.begin();
        assert_eq!(c.invoke_as::<i64>(Some(&t1), "increment", vec![]).unwrap(), 1);
        assert_eq!(c.invoke_as::<i64>(Some(&t2), "increment", vec![]).unwrap(), 1);

        assert!(matches!(tm.commit(&t1), Ok(CommitOutcome::Committed(_))));
        let err = tm.commit(&t2).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            ObjectError::from(err),
            ObjectError::TransactionAbortedConflict { .. }
        ));
        assert_eq!(t2.phase(), TransactionPhase::Aborted);

        assert_eq!(c.invoke_as::<i64>(None, "get", vec![]).unwrap(), 1);
        assert_eq!(c.stats().skipped, 1);
    }

    #[test]
    fn plain_write_after_snapshot_aborts_a_reader() {
        let (_log, rt, tm) = setup();
        let c = counter(&rt);
        let m = accounts(&rt);
        let tx = tm.begin();
        let seen: i64 = c.invoke_as(Some(&tx), "get", vec![]).unwrap();
        m.invoke(Some(&tx), "insert", vec![json!("seen"), json!(seen)])
            .unwrap();

        c.invoke(None, "add", vec![json!(5)]).unwrap();
        assert!(tm.commit(&tx).unwrap_err().is_conflict());
        assert_eq!(m.invoke(None, "get", vec![json!("seen")]).unwrap(), Value::Null);
    }

    #[test]
    fn disjoint_transactions_both_commit() {
        let (_log, rt, tm) = setup();
        let c = counter(&rt);
        let m = accounts(&rt);
        let t1 = tm.begin();
        let t2 = tm.begin();
        c.invoke(Some(&t1), "add", vec![json!(2)]).unwrap();
        m.invoke(Some(&t2), "insert", vec![json!("k"), json!("v")]).unwrap();
        tm.commit(&t1).unwrap();
        tm.commit(&t2).unwrap();
        assert_eq!(c.invoke_as::<i64>(None, "get", vec![]).unwrap(), 2);
        assert_eq!(m.invoke(None, "get", vec![json!("k")]).unwrap(), json!("v"));
    }

    #[test]
    fn abort_discards_buffered_writes() {
        let (log, rt, tm) = setup();
        let c = counter(&rt);
        let tx = tm.begin();
        c.invoke(Some(&tx), "add", vec![json!(9)]).unwrap();
        tm.abort(&tx).unwrap();
        assert!(log.is_empty());
        assert!(matches!(
            c.invoke(Some(&tx), "get", vec![]),
            Err(ObjectError::TransactionNotActive { .. })
        ));
        assert!(matches!(tm.abort(&tx), Err(TxError::InvalidPhase { .. })));
        assert!(matches!(tm.commit(&tx), Err(TxError::InvalidPhase { .. })));
    }

    #[test]
    fn snapshot_holds_across_objects_until_commit() {
        let (_log, rt, tm) = setup();
        let c = counter(&rt);
        let m = accounts(&rt);
        m.invoke(None, "insert", vec![json!("alice"), json!(10)]).unwrap();

        let tx = tm.begin();
        assert_eq!(c.invoke_as::<i64>(Some(&tx), "get", vec![]).unwrap(), 0);
        m.invoke(None, "insert", vec![json!("alice"), json!(99)]).unwrap();
        assert_eq!(balance(&m, None, "alice"), 99);
        assert_eq!(balance(&m, Some(&tx), "alice"), 10);

        // The read of a stale balance makes the commit conflict.
        c.invoke(Some(&tx), "add", vec![json!(1)]).unwrap();
        assert!(tm.commit(&tx).unwrap_err().is_conflict());
    }

    #[test]
    fn retrying_writers_never_lose_increments() {
        let (_log, rt, tm) = setup();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let c = counter(&rt);
                let tm = tm.clone();
                thread::spawn(move || {
                    let mut aborts = 0;
                    for _ in 0..10 {
                        loop {
                            let tx = tm.begin();
                            c.invoke(Some(&tx), "increment", vec![]).unwrap();
                            match tm.commit(&tx) {
                                Ok(_) => break,
                                Err(e) if e.is_conflict() => aborts += 1,
                                Err(e) => panic!("unexpected commit error: {e}"),
                            }
                        }
                    }
                    aborts
                })
            })
            .collect();
        let aborts: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

        let c = counter(&rt);
        assert_eq!(c.invoke_as::<i64>(None, "get", vec![]).unwrap(), 40);
        assert_eq!(c.stats().applied, 40);
        assert_eq!(c.stats().skipped as usize, aborts);
    }
}
