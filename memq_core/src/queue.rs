use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, PENDING, SUCCESS};
use crate::token::QToken;
use crate::Qd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QOpcode {
    Push,
    Pop,
}

/// Terminal outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Pushed,
    Popped(T),
    Failed(QueueError),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }

    pub fn code(&self) -> i32 {
        match self {
            Outcome::Failed(err) => err.code(),
            _ => SUCCESS,
        }
    }

    /// The popped value, if this is a successful pop.
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Popped(value) => Some(value),
            _ => None,
        }
    }
}

/// Completed request, handed out once by `poll` or `wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QResult<T> {
    pub qd: Qd,
    pub qt: QToken,
    pub opcode: QOpcode,
    pub outcome: Outcome<T>,
}

impl<T> QResult<T> {
    pub fn code(&self) -> i32 {
        self.outcome.code()
    }

    pub fn into_result(self) -> Result<Option<T>, QueueError> {
        match self.outcome {
            Outcome::Pushed => Ok(None),
            Outcome::Popped(value) => Ok(Some(value)),
            Outcome::Failed(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    Pending,
    Complete(QResult<T>),
}

impl<T> PollState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, PollState::Pending)
    }

    pub fn code(&self) -> i32 {
        match self {
            PollState::Pending => PENDING,
            PollState::Complete(result) => result.code(),
        }
    }
}

/// Capability set every queue transport provides.
///
/// `push` and `pop` never wait for the channel: they hand back a token at
/// once and the work happens on the queue's own workers. Completion is
/// observed with `poll` (non-blocking) or `wait`.
#[async_trait]
pub trait IoQueue<T: Send + 'static>: Send + Sync {
    fn qd(&self) -> Qd;

    fn kind(&self) -> QueueKind;

    fn push(&self, value: T) -> Result<QToken, QueueError>;

    fn pop(&self) -> Result<QToken, QueueError>;

    /// Returns `Pending`, or the terminal result (consuming it).
    fn poll(&self, qt: QToken) -> Result<PollState<T>, QueueError>;

    /// Best-effort cancellation of `qt`. The token is forgotten either way.
    fn drop_token(&self, qt: QToken) -> Result<(), QueueError>;

    fn close(&self) -> Result<(), QueueError>;

    /// Suspends until `qt` is terminal, then consumes its result.
    async fn wait(&self, qt: QToken) -> Result<QResult<T>, QueueError>;
}
