use smrlog_log::LogError;
use smrlog_object::{ObjectError, TransactionPhase};
use smrlog_types::{LogPosition, TransactionId};

/// Errors produced by the transaction coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("transaction {transaction} aborted by a conflict at {position}")]
    Aborted {
        transaction: TransactionId,
        position: LogPosition,
    },

    #[error("transaction {transaction} cannot commit from phase {phase}")]
    InvalidPhase {
        transaction: TransactionId,
        phase: TransactionPhase,
    },

    #[error(transparent)]
    Object(ObjectError),

    #[error(transparent)]
    Log(#[from] LogError),
}

impl From<ObjectError> for TxError {
    fn from(error: ObjectError) -> Self {
        match error {
            ObjectError::TransactionAbortedConflict {
                transaction,
                position,
            } => Self::Aborted {
                transaction,
                position,
            },
            ObjectError::TransactionNotActive { transaction, phase } => {
                Self::InvalidPhase { transaction, phase }
            }
            ObjectError::Log(e) => Self::Log(e),
            other => Self::Object(other),
        }
    }
}

impl From<TxError> for ObjectError {
    fn from(error: TxError) -> Self {
        match error {
            TxError::Aborted {
                transaction,
                position,
            } => Self::TransactionAbortedConflict {
                transaction,
                position,
            },
            TxError::InvalidPhase { transaction, phase } => {
                Self::TransactionNotActive { transaction, phase }
            }
            TxError::Object(e) => e,
            TxError::Log(e) => Self::Log(e),
        }
    }
}

impl TxError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Convenience alias used throughout the transaction crate.
pub type TxResult<T> = std::result::Result<T, TxError>;
