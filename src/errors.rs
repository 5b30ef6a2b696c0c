use crate::engine::{Adcoin, ParticipantId, TransactionId};
use crate::participant::ParticipantKind;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("{kind} {id} not found")]
    ParticipantNotFound { id: ParticipantId, kind: ParticipantKind },
    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),
    #[error("insufficient balance: {id} has {available}, needs {requested}")]
    InsufficientBalance {
        id: ParticipantId,
        available: Adcoin,
        requested: Adcoin,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        LedgerError::InvalidState(msg.into())
    }

    /// Only a failed store write may be retried without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}
