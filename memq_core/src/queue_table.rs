use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use futures::future::select_all;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::QueueError;
use crate::memory_queue::MemoryQueue;
use crate::queue::{IoQueue, PollState, QResult};
use crate::sga::ScatterGatherArray;
use crate::token::QToken;
use crate::Qd;

pub type SharedQueue = Arc<dyn IoQueue<ScatterGatherArray>>;

/// Allocates queue descriptors and dispatches operations by descriptor.
pub struct QueueTable {
    queues: RwLock<HashMap<Qd, SharedQueue>>,
    next_qd: AtomicI32,
}

impl Default for QueueTable {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueTable {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            next_qd: AtomicI32::new(1),
        }
    }

    /// Creates a memory queue under a fresh descriptor.
    pub fn memory_queue(&self) -> Result<Qd, QueueError> {
        let qd = self.next_qd.fetch_add(1, Ordering::Relaxed);
        let queue = MemoryQueue::<ScatterGatherArray>::new(qd)?;
        self.insert(Arc::new(queue));
        Ok(qd)
    }

    /// Registers a queue built elsewhere under its own descriptor.
    pub fn insert(&self, queue: SharedQueue) -> Option<SharedQueue> {
        let qd = queue.qd();
        debug!(qd, kind = ?queue.kind(), "queue registered");
        self.queues.write().insert(qd, queue)
    }

    pub fn get(&self, qd: Qd) -> Result<SharedQueue, QueueError> {
        self.queues
            .read()
            .get(&qd)
            .cloned()
            .ok_or(QueueError::BadDescriptor(qd))
    }

    pub fn descriptors(&self) -> Vec<Qd> {
        let mut qds: Vec<Qd> = self.queues.read().keys().copied().collect();
        qds.sort_unstable();
        qds
    }

    pub fn push(&self, qd: Qd, sga: ScatterGatherArray) -> Result<QToken, QueueError> {
        self.get(qd)?.push(sga)
    }

    pub fn pop(&self, qd: Qd) -> Result<QToken, QueueError> {
        self.get(qd)?.pop()
    }

    pub fn poll(&self, qd: Qd, qt: QToken) -> Result<PollState<ScatterGatherArray>, QueueError> {
        self.get(qd)?.poll(qt)
    }

    pub fn drop_token(&self, qd: Qd, qt: QToken) -> Result<(), QueueError> {
        self.get(qd)?.drop_token(qt)
    }

    pub async fn wait(&self, qd: Qd, qt: QToken) -> Result<QResult<ScatterGatherArray>, QueueError> {
        let queue = self.get(qd)?;
        queue.wait(qt).await
    }

    /// Waits on several tokens and returns the position and result of the
    /// first to complete. The others stay outstanding.
    pub async fn wait_any(
        &self,
        tokens: &[(Qd, QToken)],
    ) -> Result<(usize, QResult<ScatterGatherArray>), QueueError> {
        if tokens.is_empty() {
            return Err(QueueError::internal("wait_any called with no tokens"));
        }

        let queues = tokens
            .iter()
            .map(|(qd, _)| self.get(*qd))
            .collect::<Result<Vec<_>, _>>()?;
        let waits = queues
            .iter()
            .zip(tokens)
            .map(|(queue, (_, qt))| queue.wait(*qt));

        let (result, index, _rest) = select_all(waits).await;
        result.map(|result| (index, result))
    }

    /// Closes the queue and releases its descriptor. Results not yet
    /// collected are discarded with it.
    pub fn close(&self, qd: Qd) -> Result<(), QueueError> {
        let queue = self
            .queues
            .write()
            .remove(&qd)
            .ok_or(QueueError::BadDescriptor(qd))?;
        queue.close()
    }
}
