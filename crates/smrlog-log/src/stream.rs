use std::collections::BTreeSet;
use std::sync::Arc;

use smrlog_types::{LogPayload, LogPosition, ReadBound, StreamId, UpdateEntry};

use crate::error::LogResult;
use crate::traits::{LogRecord, SharedLog};

/// A [`SharedLog`] bound to one stream.
///
/// This is the handle an object replica holds: it writes update entries to
/// its own stream and reads its own stream back in log order.
#[derive(Clone)]
pub struct StreamView {
    log: Arc<dyn SharedLog>,
    stream: StreamId,
}

impl StreamView {
    pub fn new(log: Arc<dyn SharedLog>, stream: StreamId) -> Self {
        Self { log, stream }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream
    }

    /// The underlying shared log.
    pub fn log(&self) -> &Arc<dyn SharedLog> {
        &self.log
    }

    /// Append an update entry to this stream.
    pub fn write(&self, entry: UpdateEntry) -> LogResult<LogPosition> {
        self.log
            .append(&BTreeSet::from([self.stream]), &LogPayload::Update(entry))
    }

    /// Append an update entry, registering interest in its position before
    /// the entry becomes readable.
    pub fn write_with_callback(
        &self,
        entry: UpdateEntry,
        on_assigned: &dyn Fn(LogPosition),
        on_removed: &dyn Fn(LogPosition),
    ) -> LogResult<LogPosition> {
        self.log.append_with_callback(
            &BTreeSet::from([self.stream]),
            &LogPayload::Update(entry),
            on_assigned,
            on_removed,
        )
    }

    /// Read this stream's records at positions in `(after, to]`.
    pub fn read_range(&self, after: Option<LogPosition>, to: ReadBound) -> LogResult<Vec<LogRecord>> {
        self.log.read_stream(&self.stream, after, to)
    }

    /// Current tail of the whole log.
    pub fn tail(&self) -> LogResult<Option<LogPosition>> {
        self.log.tail()
    }
}

impl std::fmt::Debug for StreamView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamView")
            .field("stream", &self.stream)
            .finish()
    }
}
