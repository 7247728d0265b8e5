use std::time::Duration;

use smrlog_log::LogError;
use smrlog_types::{LogPosition, StreamId, TransactionId};

use crate::dispatch::OperationKind;
use crate::transaction::TransactionPhase;

/// Error raised by an operation handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The arguments do not have the shape the handler expects.
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),

    /// The handler rejected the operation.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors detected while building a dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("operation name must not be empty")]
    EmptyName,

    #[error("operation '{name}' is tagged both {first} and {second}")]
    ConflictingKinds {
        name: String,
        first: OperationKind,
        second: OperationKind,
    },

    #[error("operation '{name}' is registered twice")]
    DuplicateOperation { name: String },

    #[error("operation '{name}' is not classified")]
    Unclassified { name: String },
}

/// Errors surfaced by the object layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("unknown operation '{operation}'")]
    UnknownOperation { operation: String },

    #[error("argument mismatch in '{operation}': {reason}")]
    ArgumentMismatch { operation: String, reason: String },

    #[error("handler '{operation}' failed: {reason}")]
    HandlerFailure { operation: String, reason: String },

    /// An operation was used in a way its kind does not allow, such as an
    /// accessor name recorded in the log.
    #[error("operation '{operation}' is an {kind} and cannot be used here")]
    WrongKind {
        operation: String,
        kind: OperationKind,
    },

    #[error("result at {position} was already consumed")]
    ResultAlreadyConsumed { position: LogPosition },

    #[error("timed out after {timeout:?} waiting for {position} to be applied")]
    TimeoutWaitingForApply {
        position: LogPosition,
        timeout: Duration,
    },

    #[error("transaction {transaction} aborted by a conflict at {position}")]
    TransactionAbortedConflict {
        transaction: TransactionId,
        position: LogPosition,
    },

    #[error("transaction {transaction} is {phase}")]
    TransactionNotActive {
        transaction: TransactionId,
        phase: TransactionPhase,
    },

    #[error("stream {stream} was opened with a different object type in this transaction")]
    ShadowTypeMismatch { stream: StreamId },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ObjectError {
    /// Attribute a handler error to the operation that raised it.
    pub fn from_handler(operation: &str, error: HandlerError) -> Self {
        match error {
            HandlerError::ArgumentMismatch(reason) => Self::ArgumentMismatch {
                operation: operation.to_string(),
                reason,
            },
            HandlerError::Failed(reason) => Self::HandlerFailure {
                operation: operation.to_string(),
                reason,
            },
        }
    }
}

/// Convenience alias used throughout the object crate.
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;
