use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// The channel is no longer good. Carries back a value that could not be pushed.
#[derive(Debug, PartialEq, Eq)]
pub struct ChannelClosed<T = ()>(pub T);

#[derive(Debug)]
struct ChannelState<T> {
    buffer: VecDeque<T>,
    // Once false, never true again.
    good: bool,
}

/// Unbounded FIFO shared by one push-side and one pop-side worker.
///
/// There is no capacity limit: a producer that outruns its consumer grows the
/// buffer without bound. Callers rate-limit externally.
#[derive(Debug)]
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
    readable: Notify,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                buffer: VecDeque::new(),
                good: true,
            }),
            readable: Notify::new(),
        }
    }

    /// Appends a value. Fails only if the channel is closed or faulted.
    pub fn try_push(&self, value: T) -> Result<(), ChannelClosed<T>> {
        {
            let mut state = self.state.lock();
            if !state.good {
                return Err(ChannelClosed(value));
            }
            state.buffer.push_back(value);
        }
        self.readable.notify_one();
        Ok(())
    }

    /// Takes the oldest buffered value, `Ok(None)` if nothing is buffered.
    pub fn try_pop(&self) -> Result<Option<T>, ChannelClosed> {
        let mut state = self.state.lock();
        if !state.good {
            return Err(ChannelClosed(()));
        }
        Ok(state.buffer.pop_front())
    }

    /// Resolves after the next push or close. Stores a permit when nobody is
    /// waiting, so a push that lands between `try_pop` and this call is not lost.
    pub async fn readable(&self) {
        self.readable.notified().await
    }

    /// Marks the channel not good and discards whatever is still buffered.
    /// Returns the number of values discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.good = false;
            let discarded = state.buffer.len();
            state.buffer.clear();
            discarded
        };
        self.readable.notify_one();
        discarded
    }

    pub fn is_good(&self) -> bool {
        self.state.lock().good
    }

    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn values_come_out_in_push_order() {
        let channel = Channel::new();
        for i in 0..100 {
            channel.try_push(i).unwrap();
        }
        assert_eq!(channel.len(), 100);
        for i in 0..100 {
            assert_eq!(channel.try_pop(), Ok(Some(i)));
        }
        assert_eq!(channel.try_pop(), Ok(None));
    }

    #[test]
    fn closed_channel_rejects_both_sides() {
        let channel = Channel::new();
        channel.try_push("a").unwrap();
        assert_eq!(channel.close(), 1);

        assert!(!channel.is_good());
        assert_eq!(channel.try_push("b"), Err(ChannelClosed("b")));
        assert_eq!(channel.try_pop(), Err(ChannelClosed(())));
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn push_before_wait_is_not_lost() {
        let channel = Channel::new();
        channel.try_push(1u32).unwrap();
        // The permit from the push above is still stored.
        tokio::time::timeout(Duration::from_secs(1), channel.readable())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_reader() {
        let channel = Arc::new(Channel::<u32>::new());
        let reader = {
            let channel = channel.clone();
            tokio::spawn(async move {
                loop {
                    match channel.try_pop() {
                        Ok(Some(_)) => panic!("nothing was pushed"),
                        Ok(None) => channel.readable().await,
                        Err(closed) => return closed,
                    }
                }
            })
        };

        tokio::task::yield_now().await;
        channel.close();
        let closed = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed, ChannelClosed(()));
    }
}
