use smrlog_types::LogPosition;

/// Errors produced by the shared log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CRC integrity check failed for a stored frame.
    #[error("CRC integrity check failed at {position}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        position: LogPosition,
        expected: u32,
        actual: u32,
    },

    /// A stored frame is shorter than its header claims.
    #[error("invalid frame at {position}: {reason}")]
    InvalidFrame {
        position: LogPosition,
        reason: String,
    },

    /// An append must name at least one stream.
    #[error("append names no streams")]
    NoStreams,
}

/// Convenience alias used throughout the log crate.
pub type LogResult<T> = std::result::Result<T, LogError>;
