use thiserror::Error;

use crate::token::QToken;
use crate::Qd;

/// Returned by every queue operation that can fail.
///
/// Each variant has a stable integer code (see [`QueueError::code`]) so the
/// result surface can be handed across an integer-only boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is closing, closed or faulted.
    #[error("queue {qd} is not open")]
    NotOpen { qd: Qd },
    /// The token was never issued, was already consumed, or was dropped.
    #[error("unknown queue token {0}")]
    UnknownToken(QToken),
    /// The channel went away while a worker was servicing the request.
    #[error("queue closed while the request was outstanding")]
    Closed,
    /// An internal invariant was violated. Indicates a bug.
    #[error("internal queue error: {0}")]
    Internal(String),
    /// No queue is registered under this descriptor.
    #[error("bad queue descriptor {0}")]
    BadDescriptor(Qd),
    /// Workers need a tokio runtime to be spawned onto.
    #[error("no tokio runtime available to spawn queue workers")]
    NoRuntime,
}

pub const SUCCESS: i32 = 0;
pub const PENDING: i32 = -libc::EAGAIN;

impl QueueError {
    /// Integer code for this error kind. Always negative.
    pub fn code(&self) -> i32 {
        match self {
            QueueError::NotOpen { .. } => -libc::EINVAL,
            QueueError::UnknownToken(_) => -libc::ENOENT,
            QueueError::Closed => -libc::ECONNABORTED,
            QueueError::Internal(_) => -libc::ENOTRECOVERABLE,
            QueueError::BadDescriptor(_) => -libc::EBADF,
            QueueError::NoRuntime => -libc::ENOTSUP,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        QueueError::Internal(message.into())
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, QueueError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_negative() {
        let errors = [
            QueueError::NotOpen { qd: 1 },
            QueueError::UnknownToken(QToken::from_raw(7)),
            QueueError::Closed,
            QueueError::internal("double completion"),
            QueueError::BadDescriptor(3),
            QueueError::NoRuntime,
        ];

        let mut codes: Vec<i32> = errors.iter().map(QueueError::code).collect();
        assert!(codes.iter().all(|code| *code < 0));
        assert!(!codes.contains(&PENDING));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn display_names_the_descriptor() {
        let err = QueueError::NotOpen { qd: 42 };
        assert_eq!(err.to_string(), "queue 42 is not open");
    }
}
