use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one object stream within the shared log.
///
/// A `StreamId` is derived deterministically from a name using BLAKE3, so
/// every client that opens `"accounts"` lands on the same stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    hash: [u8; 32],
}

impl StreamId {
    pub fn named(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"smrlog-stream-v1:");
        hasher.update(name.as_bytes());
        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    /// `st:` followed by the first four hash bytes in hex.
    pub fn short_id(&self) -> String {
        format!("st:{}", hex::encode(&self.hash[..4]))
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.short_id())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_id())
    }
}

/// Time-ordered transaction identifier (UUID v7).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn short_id(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.short_id())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_map_to_stable_ids() {
        assert_eq!(StreamId::named("accounts"), StreamId::named("accounts"));
        assert_ne!(StreamId::named("accounts"), StreamId::named("orders"));
        let short = StreamId::named("counter").short_id();
        assert!(short.starts_with("st:"));
        assert_eq!(short.len(), 11);
    }

    #[test]
    fn transaction_ids_sort_by_creation() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert!(a < b);
        assert_eq!(a.short_id().len(), 8);
    }
}
