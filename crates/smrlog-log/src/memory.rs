use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use smrlog_types::{LogPayload, LogPosition, ReadBound, StreamId};
use tracing::{trace, warn};

use crate::codec;
use crate::error::{LogError, LogResult};
use crate::traits::{LogRecord, SharedLog};

/// In-memory shared log for tests, local demos, and embedding.
///
/// Positions are handed out densely from zero under a single write lock, so
/// the order of positions is the order of appends. Records are stored as
/// CRC-framed bytes and decoded on every read, the way a remote log unit
/// would return them.
pub struct InMemoryLog {
    inner: RwLock<LogState>,
}

#[derive(Default)]
struct LogState {
    records: Vec<StoredRecord>,
    /// Record indices per stream, ascending.
    index: HashMap<StreamId, Vec<usize>>,
}

struct StoredRecord {
    frame: Vec<u8>,
}

impl LogState {
    fn push(&mut self, streams: &BTreeSet<StreamId>, frame: Vec<u8>) {
        let slot = self.records.len();
        self.records.push(StoredRecord { frame });
        for stream in streams {
            self.index.entry(*stream).or_default().push(slot);
        }
    }
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LogState::default()),
        }
    }

    /// Number of records (data and holes) in the log.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records that were appended to `stream`.
    pub fn stream_len(&self, stream: &StreamId) -> usize {
        self.inner
            .read()
            .expect("lock poisoned")
            .index
            .get(stream)
            .map_or(0, Vec::len)
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLog for InMemoryLog {
    /// `on_assigned` and `on_removed` run under the log's write lock and
    /// must not call back into the log.
    fn append_with_callback(
        &self,
        streams: &BTreeSet<StreamId>,
        payload: &LogPayload,
        on_assigned: &dyn Fn(LogPosition),
        on_removed: &dyn Fn(LogPosition),
    ) -> LogResult<LogPosition> {
        if streams.is_empty() {
            return Err(LogError::NoStreams);
        }

        let mut state = self.inner.write().expect("lock poisoned");
        let position = LogPosition::new(state.records.len() as u64);
        on_assigned(position);

        match codec::encode_frame(payload) {
            Ok(frame) => {
                state.push(streams, frame);
                trace!(%position, streams = streams.len(), "log append");
                Ok(position)
            }
            Err(e) => {
                on_removed(position);
                // Keep positions dense: the assigned slot becomes a hole.
                let hole = codec::encode_frame(&LogPayload::Hole)?;
                state.push(streams, hole);
                warn!(%position, error = %e, "append failed after assignment; position filled");
                Err(e)
            }
        }
    }

    fn read_stream(
        &self,
        stream: &StreamId,
        after: Option<LogPosition>,
        to: ReadBound,
    ) -> LogResult<Vec<LogRecord>> {
        let state = self.inner.read().expect("lock poisoned");
        let Some(slots) = state.index.get(stream) else {
            return Ok(Vec::new());
        };

        let start = match after {
            Some(after) => slots.partition_point(|&slot| slot as u64 <= after.get()),
            None => 0,
        };

        let mut records = Vec::new();
        for &slot in &slots[start..] {
            let position = LogPosition::new(slot as u64);
            if !to.admits(position) {
                break;
            }
            let payload = match codec::decode_frame(position, &state.records[slot].frame) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(%position, %stream, error = %e, "unreadable record; treating as hole");
                    LogPayload::Hole
                }
            };
            records.push(LogRecord { position, payload });
        }
        Ok(records)
    }

    fn tail(&self) -> LogResult<Option<LogPosition>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state
            .records
            .len()
            .checked_sub(1)
            .map(|last| LogPosition::new(last as u64)))
    }

    fn fill_hole(&self, streams: &BTreeSet<StreamId>) -> LogResult<LogPosition> {
        self.append(streams, &LogPayload::Hole)
    }
}

impl std::fmt::Debug for InMemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLog")
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use serde_json::json;
    use smrlog_types::UpdateEntry;

    use super::*;

    fn update(op: &str) -> LogPayload {
        LogPayload::Update(UpdateEntry::new(op, vec![json!(1)]))
    }

    fn one(stream: StreamId) -> BTreeSet<StreamId> {
        BTreeSet::from([stream])
    }

    #[test]
    fn positions_are_dense_from_zero() {
        let log = InMemoryLog::new();
        let s = StreamId::named("s");
        assert_eq!(log.tail().unwrap(), None);
        for expected in 0..3 {
            let pos = log.append(&one(s), &update("inc")).unwrap();
            assert_eq!(pos, LogPosition::new(expected));
        }
        assert_eq!(log.tail().unwrap(), Some(LogPosition::new(2)));
    }

    #[test]
    fn read_stream_filters_other_streams_and_respects_bounds() {
        let log = InMemoryLog::new();
        let a = StreamId::named("a");
        let b = StreamId::named("b");
        log.append(&one(a), &update("a0")).unwrap(); // 0
        log.append(&one(b), &update("b1")).unwrap(); // 1
        log.append(&one(a), &update("a2")).unwrap(); // 2
        log.append(&one(a), &update("a3")).unwrap(); // 3

        let all: Vec<u64> = log
            .read_stream(&a, None, ReadBound::Tail)
            .unwrap()
            .iter()
            .map(|r| r.position.get())
            .collect();
        assert_eq!(all, vec![0, 2, 3]);

        let ranged: Vec<u64> = log
            .read_stream(&a, Some(LogPosition::new(0)), ReadBound::At(LogPosition::new(2)))
            .unwrap()
            .iter()
            .map(|r| r.position.get())
            .collect();
        assert_eq!(ranged, vec![2]);

        assert!(log
            .read_stream(&StreamId::named("none"), None, ReadBound::Tail)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn multi_stream_append_is_visible_on_every_stream() {
        let log = InMemoryLog::new();
        let a = StreamId::named("a");
        let b = StreamId::named("b");
        let pos = log.append(&BTreeSet::from([a, b]), &update("both")).unwrap();
        assert_eq!(log.read_stream(&a, None, ReadBound::Tail).unwrap()[0].position, pos);
        assert_eq!(log.read_stream(&b, None, ReadBound::Tail).unwrap()[0].position, pos);
    }

    #[test]
    fn on_assigned_sees_the_returned_position() {
        let log = InMemoryLog::new();
        let s = StreamId::named("s");
        log.append(&one(s), &update("first")).unwrap();

        let seen = Mutex::new(None);
        let pos = log
            .append_with_callback(
                &one(s),
                &update("second"),
                &|p| *seen.lock().unwrap() = Some(p),
                &|_| panic!("append should not fail"),
            )
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(pos));
    }

    #[test]
    fn empty_stream_set_is_rejected() {
        let log = InMemoryLog::new();
        assert_eq!(
            log.append(&BTreeSet::new(), &update("x")).unwrap_err(),
            LogError::NoStreams
        );
    }

    #[test]
    fn holes_are_returned_as_non_data() {
        let log = InMemoryLog::new();
        let s = StreamId::named("s");
        log.fill_hole(&one(s)).unwrap();
        let records = log.read_stream(&s, None, ReadBound::Tail).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].payload.is_data());
    }

    #[test]
    fn corrupted_frame_reads_back_as_hole() {
        let log = InMemoryLog::new();
        let s = StreamId::named("s");
        log.append(&one(s), &update("inc")).unwrap();
        {
            let mut state = log.inner.write().unwrap();
            let frame = &mut state.records[0].frame;
            let last = frame.len() - 1;
            frame[last] ^= 0x55;
        }
        let records = log.read_stream(&s, None, ReadBound::Tail).unwrap();
        assert_eq!(records[0].payload, LogPayload::Hole);
    }

    #[test]
    fn concurrent_appends_get_unique_positions() {
        let log = Arc::new(InMemoryLog::new());
        let s = StreamId::named("s");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| log.append(&one(s), &update("inc")).unwrap().get())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
        assert_eq!(log.stream_len(&s), 200);
    }
}
