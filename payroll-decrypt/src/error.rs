use std::time::Duration;

use payroll_contract::LedgerError;
use payroll_types::{CorrelationId, Failure, InvalidTransition, LifecycleState, SubjectId, TxHash};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecryptError {
    #[error("decryption of {0} is already in flight")]
    AlreadyInFlight(SubjectId),

    #[error("no decryption of {0} known")]
    UnknownSubject(SubjectId),

    #[error("decryption of {subject} ({state}) cannot be retried")]
    NotRetryable {
        subject: SubjectId,
        state: LifecycleState,
    },

    #[error("transaction for {subject} failed: {source}")]
    Submission {
        subject: SubjectId,
        source: LedgerError,
    },

    #[error("transaction {tx} carries no decryption request of {subject}")]
    CorrelationIdMissing { subject: SubjectId, tx: TxHash },

    #[error("correlation id {correlation} of {subject} is already being polled")]
    DuplicateCorrelation {
        subject: SubjectId,
        correlation: CorrelationId,
    },

    #[error(
        "gateway has no result for {subject} (correlation id {correlation}) \
         after {attempts} attempts ({elapsed:?})"
    )]
    PollTimeout {
        subject: SubjectId,
        correlation: CorrelationId,
        attempts: u32,
        elapsed: Duration,
    },

    #[error(
        "callback for {subject} (correlation id {correlation}) not observed \
         after {attempts} attempts ({elapsed:?})"
    )]
    CallbackTimeout {
        subject: SubjectId,
        correlation: CorrelationId,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("retry budget of {subject} exhausted after {retries} retries")]
    RetryBudgetExhausted { subject: SubjectId, retries: u32 },

    #[error("ledger error for {subject}: {source}")]
    Ledger {
        subject: SubjectId,
        source: LedgerError,
    },

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl DecryptError {
    /// The failure recorded when this error ends an attempt.
    pub fn failure(&self) -> Option<Failure> {
        match self {
            Self::Submission { .. } => Some(Failure::Submission),
            Self::CorrelationIdMissing { .. } => Some(Failure::CorrelationIdMissing),
            Self::DuplicateCorrelation { .. } => Some(Failure::DuplicateCorrelation),
            Self::PollTimeout { .. } => Some(Failure::PollTimeout),
            Self::CallbackTimeout { .. } => Some(Failure::CallbackTimeout),
            Self::RetryBudgetExhausted { .. } => Some(Failure::RetryBudgetExhausted),
            Self::Ledger { .. } => Some(Failure::Ledger),
            Self::AlreadyInFlight(_)
            | Self::UnknownSubject(_)
            | Self::NotRetryable { .. }
            | Self::Transition(_) => None,
        }
    }

    /// Can an explicit `retry_request` resolve this error?
    pub fn is_retryable(&self) -> bool {
        self.failure().is_some_and(Failure::is_retryable)
    }

    /// Correlation id and attempt count of a transient failure.
    pub fn attempts(&self) -> Option<(CorrelationId, u32)> {
        match self {
            Self::PollTimeout {
                correlation,
                attempts,
                ..
            }
            | Self::CallbackTimeout {
                correlation,
                attempts,
                ..
            } => Some((*correlation, *attempts)),
            _ => None,
        }
    }
}
