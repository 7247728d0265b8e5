use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{StreamId, TransactionId};
use crate::position::LogPosition;

/// Which serializer produced the arguments of an [`UpdateEntry`].
///
/// The object layer treats arguments as opaque values; the tag travels
/// with the entry so the serialization layer can decode it on replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializerTag {
    #[default]
    Json,
    /// Entries produced by a caller-supplied serializer.
    Custom(u8),
}

/// A single deterministic state transition recorded in the log.
///
/// Immutable once appended. Replaying the same sequence of entries against
/// the same initial state always yields the same state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    /// Name of the operation in the object's dispatch table.
    pub operation: String,
    /// Ordered, opaque operation arguments.
    #[serde(with = "json_values")]
    pub arguments: Vec<Value>,
    pub serializer: SerializerTag,
}

impl UpdateEntry {
    pub fn new(operation: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            operation: operation.into(),
            arguments,
            serializer: SerializerTag::default(),
        }
    }

    pub fn with_serializer(mut self, serializer: SerializerTag) -> Self {
        self.serializer = serializer;
        self
    }
}

/// A multi-stream set of updates that commits or aborts atomically.
///
/// Whether a batch committed is decided at replay time by the transaction
/// coordinator, using the snapshot and read set recorded here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionBatch {
    pub transaction: TransactionId,
    /// Log position the transaction read from.
    pub snapshot: Option<LogPosition>,
    /// Streams the transaction read.
    pub read_set: BTreeSet<StreamId>,
    /// Buffered updates per written stream, in call order.
    pub updates: BTreeMap<StreamId, Vec<UpdateEntry>>,
}

impl TransactionBatch {
    /// Streams this batch writes to.
    pub fn write_set(&self) -> BTreeSet<StreamId> {
        self.updates.keys().copied().collect()
    }

    /// Streams whose records can conflict with this batch.
    pub fn conflict_set(&self) -> BTreeSet<StreamId> {
        self.read_set.union(&self.write_set()).copied().collect()
    }

    /// The sub-sequence of updates addressed to `stream`.
    pub fn updates_for(&self, stream: &StreamId) -> &[UpdateEntry] {
        self.updates.get(stream).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.updates.values().all(Vec::is_empty)
    }
}

/// Tagged payload of one log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    Update(UpdateEntry),
    Transaction(TransactionBatch),
    /// Non-data record (a filled hole or an unreadable frame).
    Hole,
}

impl LogPayload {
    /// Whether this record carries data the object layer can replay.
    pub fn is_data(&self) -> bool {
        !matches!(self, Self::Hole)
    }
}

/// `serde_json::Value` needs `deserialize_any`, which compact binary formats
/// do not support, so argument lists travel as an embedded JSON string.
mod json_values {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(values: &[Value], serializer: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(values).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch() -> TransactionBatch {
        let a = StreamId::named("a");
        let b = StreamId::named("b");
        let c = StreamId::named("c");
        let mut updates = BTreeMap::new();
        updates.insert(a, vec![UpdateEntry::new("put", vec![json!("k"), json!(1)])]);
        updates.insert(b, vec![]);
        TransactionBatch {
            transaction: TransactionId::new(),
            snapshot: Some(LogPosition::new(4)),
            read_set: [c].into_iter().collect(),
            updates,
        }
    }

    #[test]
    fn updates_for_missing_stream_is_empty() {
        let batch = batch();
        assert!(batch.updates_for(&StreamId::named("zzz")).is_empty());
        assert_eq!(batch.updates_for(&StreamId::named("a")).len(), 1);
    }

    #[test]
    fn conflict_set_is_reads_plus_writes() {
        let set = batch().conflict_set();
        assert_eq!(set.len(), 3);
        assert!(set.contains(&StreamId::named("c")));
    }

    #[test]
    fn hole_is_not_data() {
        assert!(!LogPayload::Hole.is_data());
        assert!(LogPayload::Update(UpdateEntry::new("noop", vec![])).is_data());
    }

    #[test]
    fn arguments_survive_json_encoding() {
        let entry = UpdateEntry::new("put", vec![json!({"nested": [1, 2]}), json!(null)])
            .with_serializer(SerializerTag::Custom(3));
        let text = serde_json::to_string(&entry).unwrap();
        let decoded: UpdateEntry = serde_json::from_str(&text).unwrap();
        assert_eq!(entry, decoded);
    }
}
