use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, trace};

use crate::channel::ChannelClosed;
use crate::error::QueueError;
use crate::memory_queue::QueueCore;
use crate::queue::Outcome;
use crate::token::QToken;

#[derive(Debug)]
pub enum RequestKind<T> {
    Push(T),
    Pop,
}

/// One call to `push` or `pop`, owned by the worker that consumes it.
#[derive(Debug)]
pub struct Request<T> {
    pub qt: QToken,
    pub kind: RequestKind<T>,
}

#[derive(Debug)]
struct Pending<T> {
    requests: VecDeque<Request<T>>,
    open: bool,
}

/// FIFO of requests waiting for one worker.
///
/// `shut` is taken under the same lock as `enqueue`, so a request accepted
/// before shutdown is always seen by the worker's drain.
#[derive(Debug)]
pub struct RequestQueue<T> {
    pending: Mutex<Pending<T>>,
    ready: Notify,
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending {
                requests: VecDeque::new(),
                open: true,
            }),
            ready: Notify::new(),
        }
    }

    /// Hands the request back if the queue has been shut.
    pub fn enqueue(&self, request: Request<T>) -> Result<(), Request<T>> {
        {
            let mut pending = self.pending.lock();
            if !pending.open {
                return Err(request);
            }
            pending.requests.push_back(request);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Removes a request that no worker has picked up yet.
    pub fn remove(&self, qt: QToken) -> bool {
        let mut pending = self.pending.lock();
        match pending.requests.iter().position(|request| request.qt == qt) {
            Some(index) => pending.requests.remove(index).is_some(),
            None => false,
        }
    }

    /// Stops accepting requests. Already queued ones are still drained.
    pub fn shut(&self) {
        self.pending.lock().open = false;
        self.ready.notify_one();
    }

    /// Next request in FIFO order; `None` once shut and drained.
    pub async fn next(&self) -> Option<Request<T>> {
        loop {
            {
                let mut pending = self.pending.lock();
                if let Some(request) = pending.requests.pop_front() {
                    return Some(request);
                }
                if !pending.open {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().requests.is_empty()
    }
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn push_worker<T: Send + 'static>(core: Arc<QueueCore<T>>) {
    serve(&core, &core.push_requests, "push").await
}

pub(crate) async fn pop_worker<T: Send + 'static>(core: Arc<QueueCore<T>>) {
    serve(&core, &core.pop_requests, "pop").await
}

async fn serve<T: Send + 'static>(
    core: &QueueCore<T>,
    requests: &RequestQueue<T>,
    side: &'static str,
) {
    let qd = core.qd;
    debug!(qd, side, "worker started");

    while let Some(Request { qt, kind }) = requests.next().await {
        if !core.registry.claim(qt) {
            trace!(qd, side, %qt, "request dropped before service");
            continue;
        }

        let outcome = perform(core, kind).await;
        trace!(qd, side, %qt, ok = outcome.is_ok(), "request serviced");

        if let Err(err) = core.registry.complete(qt, outcome) {
            error!(qd, side, %qt, error = %err, "completion invariant violated");
            core.fault();
            fail_remaining(core, requests, side).await;
            panic!("queue {} {} worker: {}", qd, side, err);
        }
    }

    debug!(qd, side, "worker stopped");
    core.worker_stopped();
}

// Only called once the queue is faulted and `requests` is shut.
async fn fail_remaining<T>(core: &QueueCore<T>, requests: &RequestQueue<T>, side: &'static str) {
    while let Some(Request { qt, .. }) = requests.next().await {
        if !core.registry.claim(qt) {
            continue;
        }
        if let Err(err) = core.registry.complete(qt, Outcome::Failed(QueueError::Closed)) {
            error!(qd = core.qd, side, %qt, error = %err, "could not fail request after fault");
        }
    }
}

// The channel lock is released before this returns; registry calls come after.
async fn perform<T>(core: &QueueCore<T>, kind: RequestKind<T>) -> Outcome<T> {
    match kind {
        RequestKind::Push(value) => match core.channel.try_push(value) {
            Ok(()) => Outcome::Pushed,
            Err(ChannelClosed(_)) => Outcome::Failed(QueueError::Closed),
        },
        RequestKind::Pop => loop {
            match core.channel.try_pop() {
                Ok(Some(value)) => break Outcome::Popped(value),
                Ok(None) => core.channel.readable().await,
                Err(ChannelClosed(())) => break Outcome::Failed(QueueError::Closed),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(raw: u64) -> Request<u32> {
        Request {
            qt: QToken::from_raw(raw),
            kind: RequestKind::Pop,
        }
    }

    #[tokio::test]
    async fn requests_come_out_in_order() {
        let queue = RequestQueue::new();
        for raw in 1..=3 {
            queue.enqueue(request(raw)).unwrap();
        }
        for raw in 1..=3 {
            assert_eq!(queue.next().await.unwrap().qt, QToken::from_raw(raw));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn removed_request_is_never_handed_out() {
        let queue = RequestQueue::new();
        queue.enqueue(request(1)).unwrap();
        queue.enqueue(request(2)).unwrap();

        assert!(queue.remove(QToken::from_raw(1)));
        assert!(!queue.remove(QToken::from_raw(1)));
        assert_eq!(queue.next().await.unwrap().qt, QToken::from_raw(2));
    }

    #[tokio::test]
    async fn shut_queue_drains_then_ends() {
        let queue = RequestQueue::new();
        queue.enqueue(request(1)).unwrap();
        queue.shut();

        assert!(queue.enqueue(request(2)).is_err());
        assert_eq!(queue.next().await.unwrap().qt, QToken::from_raw(1));
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn shut_wakes_an_idle_worker() {
        let queue = Arc::new(RequestQueue::<u32>::new());
        let idle = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await.is_none() })
        };
        tokio::task::yield_now().await;
        queue.shut();

        let ended = tokio::time::timeout(Duration::from_secs(1), idle)
            .await
            .unwrap()
            .unwrap();
        assert!(ended);
    }
}
