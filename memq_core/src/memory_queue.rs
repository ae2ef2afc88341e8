use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::error::QueueError;
use crate::queue::{IoQueue, PollState, QOpcode, QResult, QueueKind};
use crate::registry::{CompletionRegistry, Forgotten};
use crate::scheduler::WorkerSet;
use crate::sga::ScatterGatherArray;
use crate::token::QToken;
use crate::worker::{pop_worker, push_worker, Request, RequestKind, RequestQueue};
use crate::Qd;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Open = 0,
    Closing = 1,
    Closed = 2,
    Faulted = 3,
}

impl From<u8> for QueueState {
    fn from(value: u8) -> Self {
        match value {
            0 => QueueState::Open,
            1 => QueueState::Closing,
            2 => QueueState::Closed,
            3 => QueueState::Faulted,
            _ => panic!("Invalid queue state: {}", value),
        }
    }
}

const WORKERS: usize = 2;

/// State shared between the facade and its two workers.
pub(crate) struct QueueCore<T> {
    pub(crate) qd: Qd,
    state: AtomicU8,
    running: AtomicUsize,
    pub(crate) channel: Channel<T>,
    pub(crate) registry: CompletionRegistry<T>,
    pub(crate) push_requests: RequestQueue<T>,
    pub(crate) pop_requests: RequestQueue<T>,
}

impl<T> QueueCore<T> {
    fn new(qd: Qd) -> Self {
        Self {
            qd,
            state: AtomicU8::new(QueueState::Open as u8),
            running: AtomicUsize::new(WORKERS),
            channel: Channel::new(),
            registry: CompletionRegistry::new(qd),
            push_requests: RequestQueue::new(),
            pop_requests: RequestQueue::new(),
        }
    }

    fn state(&self) -> QueueState {
        QueueState::from(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: QueueState, to: QueueState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // Order matters: the channel goes bad before the workers are told to
    // drain, so every drained request fails with `Closed`.
    fn stop(&self) {
        let discarded = self.channel.close();
        if discarded > 0 {
            warn!(qd = self.qd, discarded, "values still buffered at close were discarded");
        }
        self.push_requests.shut();
        self.pop_requests.shut();
    }

    /// Called by each worker after it has drained its requests. The last one
    /// out completes `Closing -> Closed`.
    pub(crate) fn worker_stopped(&self) {
        if self.running.fetch_sub(1, Ordering::AcqRel) == 1
            && self.transition(QueueState::Closing, QueueState::Closed)
        {
            info!(qd = self.qd, "memory queue closed");
        }
    }

    /// Terminal. Reachable from `Open` and `Closing` only.
    pub(crate) fn fault(&self) {
        let mut current = self.state();
        while matches!(current, QueueState::Open | QueueState::Closing) {
            if self.transition(current, QueueState::Faulted) {
                break;
            }
            current = self.state();
        }
        self.stop();
    }
}

/// In-memory queue: a FIFO channel served by one push and one pop worker.
///
/// Every operation returns immediately. Workers run on the tokio runtime the
/// queue was created on and are aborted when the queue is dropped; results
/// nobody collected are discarded with it.
pub struct MemoryQueue<T = ScatterGatherArray> {
    core: Arc<QueueCore<T>>,
    workers: WorkerSet,
}

impl<T: Send + 'static> MemoryQueue<T> {
    /// Creates an open queue with its workers on the current tokio runtime.
    pub fn new(qd: Qd) -> Result<Self, QueueError> {
        Ok(Self::start(qd, WorkerSet::current()?))
    }

    pub fn with_runtime(qd: Qd, runtime: Handle) -> Self {
        Self::start(qd, WorkerSet::with_runtime(runtime))
    }

    fn start(qd: Qd, workers: WorkerSet) -> Self {
        let core = Arc::new(QueueCore::new(qd));
        workers.spawn("push", push_worker(core.clone()));
        workers.spawn("pop", pop_worker(core.clone()));
        debug!(qd, "memory queue opened");
        Self { core, workers }
    }

    pub fn state(&self) -> QueueState {
        self.core.state()
    }

    /// Number of values pushed and not yet popped.
    pub fn buffered(&self) -> usize {
        self.core.channel.len()
    }

    /// Tokens issued and not yet consumed by `poll`/`wait` or dropped.
    pub fn outstanding(&self) -> usize {
        self.core.registry.outstanding()
    }

    fn submit(&self, kind: RequestKind<T>) -> Result<QToken, QueueError> {
        let not_open = QueueError::NotOpen { qd: self.core.qd };
        if self.core.state() != QueueState::Open {
            return Err(not_open);
        }

        let (opcode, requests) = match kind {
            RequestKind::Push(_) => (QOpcode::Push, &self.core.push_requests),
            RequestKind::Pop => (QOpcode::Pop, &self.core.pop_requests),
        };
        let qt = self.core.registry.register(opcode);
        if requests.enqueue(Request { qt, kind }).is_err() {
            // Lost the race with `close`; the token was never visible.
            let forgotten = self.core.registry.forget(qt);
            debug_assert_eq!(forgotten, Ok(Forgotten::Queued));
            return Err(not_open);
        }
        Ok(qt)
    }

    /// Closes the queue if it is still open, then waits for both workers to
    /// finish draining.
    pub async fn shutdown(self) -> Result<(), QueueError> {
        if self.state() == QueueState::Open {
            self.close()?;
        }
        self.workers.join_all().await
    }
}

#[async_trait]
impl<T: Send + 'static> IoQueue<T> for MemoryQueue<T> {
    fn qd(&self) -> Qd {
        self.core.qd
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Memory
    }

    fn push(&self, value: T) -> Result<QToken, QueueError> {
        self.submit(RequestKind::Push(value))
    }

    fn pop(&self) -> Result<QToken, QueueError> {
        self.submit(RequestKind::Pop)
    }

    fn poll(&self, qt: QToken) -> Result<PollState<T>, QueueError> {
        self.core.registry.peek(qt)
    }

    fn drop_token(&self, qt: QToken) -> Result<(), QueueError> {
        if self.core.registry.forget(qt)? == Forgotten::Queued {
            // Whichever side it was queued on; the other `remove` is a miss.
            let removed = self.core.push_requests.remove(qt) || self.core.pop_requests.remove(qt);
            debug!(qd = self.core.qd, %qt, removed, "queued request dropped");
        }
        Ok(())
    }

    fn close(&self) -> Result<(), QueueError> {
        if !self.core.transition(QueueState::Open, QueueState::Closing) {
            return Err(QueueError::NotOpen { qd: self.core.qd });
        }
        // Stays `Closing` until both workers have drained.
        self.core.stop();
        info!(qd = self.core.qd, "memory queue closing");
        Ok(())
    }

    async fn wait(&self, qt: QToken) -> Result<QResult<T>, QueueError> {
        self.core.registry.wait(qt).await
    }
}
