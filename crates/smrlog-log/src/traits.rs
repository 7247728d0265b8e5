use std::collections::BTreeSet;

use smrlog_types::{LogPayload, LogPosition, ReadBound, StreamId};

use crate::error::LogResult;

/// One record read back from a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub position: LogPosition,
    pub payload: LogPayload,
}

/// Boundary to the shared, totally ordered, append-only log.
///
/// Implementations must satisfy:
/// - Positions are unique and assigned in increasing order.
/// - A record is visible to readers only after `append_with_callback` has
///   run its `on_assigned` callback for that position.
/// - `read_stream` returns records in strictly increasing position order.
pub trait SharedLog: Send + Sync {
    /// Append `payload` to every stream in `streams` and return its position.
    ///
    /// `on_assigned` runs once the position is known and before any reader
    /// can observe the record. `on_removed` runs if the append fails after a
    /// position was assigned.
    fn append_with_callback(
        &self,
        streams: &BTreeSet<StreamId>,
        payload: &LogPayload,
        on_assigned: &dyn Fn(LogPosition),
        on_removed: &dyn Fn(LogPosition),
    ) -> LogResult<LogPosition>;

    /// Read the records of `stream` at positions in `(after, to]`.
    ///
    /// `after = None` reads from the start of the log.
    fn read_stream(
        &self,
        stream: &StreamId,
        after: Option<LogPosition>,
        to: ReadBound,
    ) -> LogResult<Vec<LogRecord>>;

    /// Position of the most recently appended record, if any.
    fn tail(&self) -> LogResult<Option<LogPosition>>;

    /// Consume a position with a non-data record on the given streams.
    fn fill_hole(&self, streams: &BTreeSet<StreamId>) -> LogResult<LogPosition>;

    /// Append `payload` without callbacks.
    fn append(&self, streams: &BTreeSet<StreamId>, payload: &LogPayload) -> LogResult<LogPosition> {
        self.append_with_callback(streams, payload, &|_| {}, &|_| {})
    }
}
