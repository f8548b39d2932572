use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{CorrelationId, SubjectId};

/// Lifecycle of a decryption request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    Requesting,
    Polling,
    AwaitingCallback,
    Succeeded,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle) && !self.is_terminal()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Polling => "polling",
            Self::AwaitingCallback => "awaiting-callback",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a request ended up in [`LifecycleState::Failed`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Failure {
    Submission,
    CorrelationIdMissing,
    DuplicateCorrelation,
    PollTimeout,
    CallbackTimeout,
    RetryBudgetExhausted,
    Ledger,
    /// The caller gave up on the request before it finished.
    Cancelled,
}

impl Failure {
    /// Transient failures which an explicit retry may resolve.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::PollTimeout | Self::CallbackTimeout | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::CorrelationIdMissing => "correlation-id-missing",
            Self::DuplicateCorrelation => "duplicate-correlation",
            Self::PollTimeout => "poll-timeout",
            Self::CallbackTimeout => "callback-timeout",
            Self::RetryBudgetExhausted => "retry-budget-exhausted",
            Self::Ledger => "ledger",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall lifecycle progress in percent.
///
/// Never decreases: a smaller value passed to [`Progress::advance`] is ignored.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(u8);

impl Progress {
    pub const DONE: Self = Self(100);

    pub fn new(p: u8) -> Self {
        Self(p.min(100))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Move forward to `p`, returning `true` if the value changed.
    pub fn advance(&mut self, p: Progress) -> bool {
        if p > *self {
            *self = p;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// The final value of a successful decryption.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decrypted {
    pub subject: SubjectId,
    pub value: U256,
    pub correlation: CorrelationId,
}

/// One decryption of one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionRequest {
    subject: SubjectId,
    correlation: Option<CorrelationId>,
    retries: u32,
    state: LifecycleState,
    progress: Progress,
    failure: Option<(Failure, String)>,
    result: Option<Decrypted>,
}

impl DecryptionRequest {
    pub fn new(subject: SubjectId) -> Self {
        Self {
            subject,
            correlation: None,
            retries: 0,
            state: LifecycleState::Idle,
            progress: Progress::default(),
            failure: None,
            result: None,
        }
    }

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn correlation(&self) -> Option<CorrelationId> {
        self.correlation
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn failure(&self) -> Option<(Failure, &str)> {
        self.failure.as_ref().map(|(f, m)| (*f, m.as_str()))
    }

    pub fn result(&self) -> Option<&Decrypted> {
        self.result.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.failure, Some((Failure::RetryBudgetExhausted, _)))
    }

    /// Enter `Requesting` from `Idle` or, for a retry, from `Failed`.
    ///
    /// A new attempt starts a new lifecycle: the previous correlation id,
    /// failure and progress are discarded.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            LifecycleState::Idle | LifecycleState::Failed => {
                self.state = LifecycleState::Requesting;
                self.correlation = None;
                self.failure = None;
                self.progress = Progress::default();
                Ok(())
            }
            s => Err(InvalidTransition(s, LifecycleState::Requesting)),
        }
    }

    pub fn record_retry(&mut self) {
        self.retries += 1
    }

    /// `Requesting` -> `Polling`, which requires the ledger assigned id.
    pub fn polling(&mut self, id: CorrelationId) -> Result<(), InvalidTransition> {
        if self.state != LifecycleState::Requesting {
            return Err(InvalidTransition(self.state, LifecycleState::Polling));
        }
        self.correlation = Some(id);
        self.state = LifecycleState::Polling;
        Ok(())
    }

    pub fn awaiting_callback(&mut self) -> Result<(), InvalidTransition> {
        if self.state != LifecycleState::Polling {
            return Err(InvalidTransition(self.state, LifecycleState::AwaitingCallback));
        }
        self.state = LifecycleState::AwaitingCallback;
        Ok(())
    }

    pub fn succeed(&mut self, value: U256) -> Result<Decrypted, InvalidTransition> {
        let (LifecycleState::AwaitingCallback, Some(correlation)) = (self.state, self.correlation)
        else {
            return Err(InvalidTransition(self.state, LifecycleState::Succeeded));
        };
        let d = Decrypted {
            subject: self.subject,
            value,
            correlation,
        };
        self.state = LifecycleState::Succeeded;
        self.progress = Progress::DONE;
        self.result = Some(d);
        Ok(d)
    }

    /// Fail the current attempt. Progress stays where it was.
    pub fn fail(&mut self, f: Failure, msg: String) {
        self.state = LifecycleState::Failed;
        self.failure = Some((f, msg))
    }

    pub fn advance(&mut self, p: Progress) -> bool {
        self.progress.advance(p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle transition: {0} -> {1}")]
pub struct InvalidTransition(pub LifecycleState, pub LifecycleState);
