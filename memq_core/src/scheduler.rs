use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::QueueError;

pub type WorkerId = u64;

struct WorkerEntry {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Owns the tasks a queue runs on the tokio scheduler.
///
/// Dropping the set aborts every task still running.
pub struct WorkerSet {
    workers: Mutex<HashMap<WorkerId, WorkerEntry>>,
    next_id: AtomicU64,
    runtime: Handle,
}

impl WorkerSet {
    /// Spawns onto the runtime of the calling context.
    pub fn current() -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Ok(Self::with_runtime(runtime))
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            runtime,
        }
    }

    pub fn spawn<F>(&self, name: &'static str, body: F) -> WorkerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = self.runtime.spawn(body);
        self.workers.lock().insert(id, WorkerEntry { name, handle });
        id
    }

    pub async fn join(&self, id: WorkerId) -> Result<(), QueueError> {
        let entry = self.workers.lock().remove(&id);

        if let Some(WorkerEntry { name, handle }) = entry {
            handle.await.map_err(|e| {
                QueueError::internal(format!("worker {} ({}) failed: {}", id, name, e))
            })?;
        }

        Ok(())
    }

    /// Waits for every worker to finish. Reports the first failure after all
    /// workers have been joined.
    pub async fn join_all(&self) -> Result<(), QueueError> {
        let mut ids: Vec<WorkerId> = self.workers.lock().keys().copied().collect();
        ids.sort_unstable();

        let mut first_error = None;
        for id in ids {
            if let Err(err) = self.join(id).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn abort_all(&self) {
        for (_, entry) in self.workers.lock().drain() {
            entry.handle.abort();
        }
    }

    /// Workers not yet joined or aborted, including ones that already exited.
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finished(&self, id: WorkerId) -> bool {
        self.workers
            .lock()
            .get(&id)
            .map_or(true, |entry| entry.handle.is_finished())
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn join_waits_for_the_task() {
        let workers = WorkerSet::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let id = workers.spawn("flag", async move {
            flag.store(true, Ordering::SeqCst);
        });

        workers.join(id).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(workers.is_empty());
    }

    #[tokio::test]
    async fn panicking_worker_reports_internal_error() {
        let workers = WorkerSet::current().unwrap();
        workers.spawn("doomed", async { panic!("invariant violated") });
        workers.spawn("fine", async {});

        let err = workers.join_all().await.unwrap_err();
        assert!(err.is_internal());
        assert!(workers.is_empty());
    }

    #[tokio::test]
    async fn dropping_the_set_aborts_parked_workers() {
        let parked = Arc::new(Notify::new());
        let workers = WorkerSet::current().unwrap();
        let wait_on = parked.clone();
        let id = workers.spawn("parked", async move { wait_on.notified().await });

        tokio::task::yield_now().await;
        assert!(!workers.is_finished(id));
        drop(workers);

        // The aborted task released its clone.
        for _ in 0..10 {
            if Arc::strong_count(&parked) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&parked), 1);
    }

    #[test]
    fn outside_a_runtime_there_is_nothing_to_spawn_on() {
        assert_eq!(WorkerSet::current().err(), Some(QueueError::NoRuntime));
    }
}
