use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::QueueError;
use crate::queue::{Outcome, PollState, QOpcode, QResult};
use crate::token::QToken;
use crate::Qd;

#[derive(Debug)]
enum Slot<T> {
    // Issued, not yet picked up by a worker.
    Queued(QOpcode),
    InFlight(QOpcode),
    Done(QResult<T>),
}

/// What a forgotten token was doing when `forget` removed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forgotten {
    Queued,
    InFlight,
    Done,
}

#[derive(Debug)]
struct Records<T> {
    slots: HashMap<QToken, Slot<T>>,
    // Forgotten while in flight; the worker's completion is swallowed.
    abandoned: HashSet<QToken>,
}

/// Maps every outstanding token of one queue to its completion record.
///
/// A record is created `Queued`, claimed by exactly one worker, completed
/// exactly once, and removed when `poll` hands out the terminal result.
/// The registry has its own lock, never held while touching the channel.
#[derive(Debug)]
pub struct CompletionRegistry<T> {
    qd: Qd,
    records: Mutex<Records<T>>,
    completed: Notify,
}

impl<T> CompletionRegistry<T> {
    pub fn new(qd: Qd) -> Self {
        Self {
            qd,
            records: Mutex::new(Records {
                slots: HashMap::new(),
                abandoned: HashSet::new(),
            }),
            completed: Notify::new(),
        }
    }

    pub fn register(&self, opcode: QOpcode) -> QToken {
        let qt = QToken::mint();
        self.records.lock().slots.insert(qt, Slot::Queued(opcode));
        qt
    }

    /// Moves a queued record in flight. `false` means the token was dropped
    /// before a worker got to it and the request must not be serviced.
    pub fn claim(&self, qt: QToken) -> bool {
        let mut records = self.records.lock();
        let Some(slot) = records.slots.get_mut(&qt) else {
            return false;
        };
        if let Slot::Queued(opcode) = *slot {
            *slot = Slot::InFlight(opcode);
            return true;
        }
        false
    }

    /// Records the terminal outcome of a claimed request.
    ///
    /// Completing a token that is unknown, unclaimed or already terminal is an
    /// invariant violation and returns `Internal`.
    pub fn complete(&self, qt: QToken, outcome: Outcome<T>) -> Result<(), QueueError> {
        {
            let mut records = self.records.lock();
            if records.abandoned.remove(&qt) {
                return Ok(());
            }
            let slot = records.slots.get_mut(&qt).ok_or_else(|| {
                QueueError::internal(format!("completion of unknown token {}", qt))
            })?;
            let opcode = match slot {
                Slot::InFlight(opcode) => *opcode,
                Slot::Queued(_) => {
                    return Err(QueueError::internal(format!(
                        "completion of unclaimed token {}",
                        qt
                    )))
                }
                Slot::Done(_) => {
                    return Err(QueueError::internal(format!(
                        "token {} completed twice",
                        qt
                    )))
                }
            };
            *slot = Slot::Done(QResult {
                qd: self.qd,
                qt,
                opcode,
                outcome,
            });
        }
        self.completed.notify_waiters();
        Ok(())
    }

    /// Non-blocking status check. A terminal record is removed and returned.
    pub fn peek(&self, qt: QToken) -> Result<PollState<T>, QueueError> {
        let mut records = self.records.lock();
        match records.slots.get(&qt) {
            None => Err(QueueError::UnknownToken(qt)),
            Some(Slot::Queued(_)) | Some(Slot::InFlight(_)) => Ok(PollState::Pending),
            Some(Slot::Done(_)) => match records.slots.remove(&qt) {
                Some(Slot::Done(result)) => Ok(PollState::Complete(result)),
                _ => unreachable!(),
            },
        }
    }

    pub fn forget(&self, qt: QToken) -> Result<Forgotten, QueueError> {
        let forgotten = {
            let mut records = self.records.lock();
            match records.slots.remove(&qt) {
                None => return Err(QueueError::UnknownToken(qt)),
                Some(Slot::Queued(_)) => Forgotten::Queued,
                Some(Slot::InFlight(_)) => {
                    records.abandoned.insert(qt);
                    Forgotten::InFlight
                }
                Some(Slot::Done(_)) => Forgotten::Done,
            }
        };
        // Anyone waiting on this token must observe that it is gone.
        self.completed.notify_waiters();
        Ok(forgotten)
    }

    /// Suspends until `qt` is terminal, then consumes it like `peek`.
    pub async fn wait(&self, qt: QToken) -> Result<QResult<T>, QueueError> {
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let PollState::Complete(result) = self.peek(qt)? {
                return Ok(result);
            }
            notified.await;
        }
    }

    /// Number of tokens that have not been consumed or forgotten.
    pub fn outstanding(&self) -> usize {
        self.records.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> CompletionRegistry<&'static str> {
        CompletionRegistry::new(5)
    }

    #[test]
    fn pending_until_completed_then_consumed() {
        let registry = registry();
        let qt = registry.register(QOpcode::Pop);
        assert!(registry.peek(qt).unwrap().is_pending());

        assert!(registry.claim(qt));
        assert!(registry.peek(qt).unwrap().is_pending());

        registry.complete(qt, Outcome::Popped("a")).unwrap();
        let result = match registry.peek(qt).unwrap() {
            PollState::Complete(result) => result,
            PollState::Pending => panic!("expected a completed record"),
        };
        assert_eq!(result.qd, 5);
        assert_eq!(result.qt, qt);
        assert_eq!(result.opcode, QOpcode::Pop);
        assert_eq!(result.outcome, Outcome::Popped("a"));

        assert_eq!(registry.peek(qt), Err(QueueError::UnknownToken(qt)));
        assert_eq!(registry.outstanding(), 0);
    }

    #[test]
    fn second_completion_is_internal_error() {
        let registry = registry();
        let qt = registry.register(QOpcode::Push);
        assert!(registry.claim(qt));
        registry.complete(qt, Outcome::Pushed).unwrap();

        let err = registry.complete(qt, Outcome::Failed(QueueError::Closed)).unwrap_err();
        assert!(err.is_internal());

        // The first outcome stands.
        match registry.peek(qt).unwrap() {
            PollState::Complete(result) => assert_eq!(result.outcome, Outcome::Pushed),
            PollState::Pending => panic!("record lost its terminal state"),
        }
    }

    #[test]
    fn completing_unknown_or_unclaimed_tokens_fails() {
        let registry = registry();
        assert!(registry
            .complete(QToken::from_raw(u64::MAX), Outcome::Pushed)
            .unwrap_err()
            .is_internal());

        let qt = registry.register(QOpcode::Push);
        assert!(registry.complete(qt, Outcome::Pushed).unwrap_err().is_internal());
    }

    #[test]
    fn forgotten_queued_token_cannot_be_claimed() {
        let registry = registry();
        let qt = registry.register(QOpcode::Pop);
        assert_eq!(registry.forget(qt), Ok(Forgotten::Queued));
        assert!(!registry.claim(qt));
        assert_eq!(registry.peek(qt), Err(QueueError::UnknownToken(qt)));
        assert_eq!(registry.forget(qt), Err(QueueError::UnknownToken(qt)));
    }

    #[test]
    fn completion_of_forgotten_in_flight_token_is_swallowed() {
        let registry = registry();
        let qt = registry.register(QOpcode::Pop);
        assert!(registry.claim(qt));
        assert_eq!(registry.forget(qt), Ok(Forgotten::InFlight));

        registry.complete(qt, Outcome::Popped("late")).unwrap();
        assert_eq!(registry.peek(qt), Err(QueueError::UnknownToken(qt)));
        assert_eq!(registry.outstanding(), 0);
    }

    #[tokio::test]
    async fn wait_wakes_on_completion() {
        let registry = Arc::new(registry());
        let qt = registry.register(QOpcode::Pop);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait(qt).await })
        };
        tokio::task::yield_now().await;

        assert!(registry.claim(qt));
        registry.complete(qt, Outcome::Popped("b")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, Outcome::Popped("b"));
    }

    #[tokio::test]
    async fn wait_reports_forgotten_token() {
        let registry = Arc::new(registry());
        let qt = registry.register(QOpcode::Push);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait(qt).await })
        };
        tokio::task::yield_now().await;
        registry.forget(qt).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err, QueueError::UnknownToken(qt));
    }
}
