//! Bounded async write queue with a fixed worker pool.
//!
//! Callers hand off write work with [`AsyncWriteQueue::enqueue`], which never
//! waits: a full or stopped queue rejects the task immediately. A fixed set of
//! Tokio workers pulls tasks from the shared receiver and runs them. Failures
//! inside a task are the task's own business; the queue only measures how
//! long tasks waited.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::metrics::{ClientMetrics, Op};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A deferred write, owned by the queue from enqueue until it runs or is
/// dropped.
pub struct AsyncTask {
    op: Op,
    job: Job,
    enqueued_at: Instant,
}

impl AsyncTask {
    pub fn new<F>(op: Op, job: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            op,
            job: Box::pin(job),
            enqueued_at: Instant::now(),
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }
}

impl std::fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTask")
            .field("op", &self.op)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<AsyncTask>>>;

pub struct AsyncWriteQueue {
    tx: mpsc::Sender<AsyncTask>,
    rx: SharedReceiver,
    buffer_size: usize,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<ClientMetrics>,
}

impl AsyncWriteQueue {
    /// Create the queue and spawn `concurrency` workers on the current Tokio
    /// runtime.
    pub fn new(
        buffer_size: usize,
        concurrency: usize,
        metrics: Arc<ClientMetrics>,
    ) -> Result<Self, ClientError> {
        if buffer_size == 0 {
            return Err(ClientError::Config(
                "max async buffer size must be positive".to_string(),
            ));
        }
        if buffer_size > Semaphore::MAX_PERMITS {
            return Err(ClientError::Config(format!(
                "max async buffer size must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if concurrency == 0 {
            return Err(ClientError::Config(
                "max async concurrency must be positive".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|_| {
            ClientError::Config("async write queue requires a Tokio runtime".to_string())
        })?;

        let (tx, rx) = mpsc::channel(buffer_size);
        let rx = Arc::new(AsyncMutex::new(rx));
        let (shutdown, _) = watch::channel(false);

        let workers = (0..concurrency)
            .map(|id| {
                runtime.spawn(run_worker(
                    id,
                    rx.clone(),
                    shutdown.subscribe(),
                    metrics.clone(),
                ))
            })
            .collect();

        Ok(Self {
            tx,
            rx,
            buffer_size,
            stopped: AtomicBool::new(false),
            shutdown,
            workers: parking_lot::Mutex::new(workers),
            metrics,
        })
    }

    /// Try to place `task` on the queue without waiting.
    pub fn enqueue(&self, task: AsyncTask) -> Result<(), ClientError> {
        if self.stopped.load(Ordering::Acquire) {
            self.metrics.async_rejected_stopped().increment();
            return Err(ClientError::QueueStopped);
        }

        match self.tx.try_send(task) {
            Ok(()) => {
                self.metrics.async_enqueued().increment();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.metrics.async_rejected_full().increment();
                debug!(
                    name = self.metrics.name(),
                    op = task.op().as_str(),
                    "async write queue full, dropping task"
                );
                Err(ClientError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.async_rejected_stopped().increment();
                Err(ClientError::QueueStopped)
            }
        }
    }

    /// Number of tasks buffered and not yet picked up by a worker.
    pub fn len(&self) -> usize {
        self.buffer_size - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting work, wait for running tasks to finish, and discard
    /// anything still buffered. Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(name = self.metrics.name(), error = %e, "async worker exited abnormally");
            }
        }

        let mut rx = self.rx.lock().await;
        rx.close();
        let mut dropped = 0u64;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            self.metrics.async_dropped().add(dropped);
            debug!(
                name = self.metrics.name(),
                dropped, "discarded buffered async tasks on stop"
            );
        }
    }
}

impl std::fmt::Debug for AsyncWriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWriteQueue")
            .field("buffer_size", &self.buffer_size)
            .field("len", &self.len())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    id: usize,
    rx: SharedReceiver,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<ClientMetrics>,
) {
    loop {
        // Only one idle worker waits on the channel at a time; the rest queue
        // on the receiver lock.
        let task = {
            let mut rx = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                rx = rx.lock() => rx,
            };
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                task = rx.recv() => task,
            }
        };

        let Some(task) = task else {
            break;
        };

        let waited = task.enqueued_at.elapsed().as_nanos() as u64;
        let _ = metrics.async_queue_latency().increment(waited);

        // A panicking task must not take the worker down with it.
        if let Err(e) = tokio::spawn(task.job).await {
            warn!(
                name = metrics.name(),
                worker = id,
                op = task.op.as_str(),
                error = %e,
                "async task panicked"
            );
        }
    }
    debug!(name = metrics.name(), worker = id, "async worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn metrics() -> Arc<ClientMetrics> {
        Arc::new(ClientMetrics::new("queue-test"))
    }

    #[test]
    fn requires_runtime() {
        let err = AsyncWriteQueue::new(4, 1, metrics()).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn rejects_zero_parameters() {
        assert!(matches!(
            AsyncWriteQueue::new(0, 1, metrics()),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            AsyncWriteQueue::new(1, 0, metrics()),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            AsyncWriteQueue::new(Semaphore::MAX_PERMITS + 1, 1, metrics()),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn runs_enqueued_tasks() {
        let queue = AsyncWriteQueue::new(16, 2, metrics()).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());

        for _ in 0..8 {
            let ran = ran.clone();
            let done = done.clone();
            queue
                .enqueue(AsyncTask::new(Op::Set, async move {
                    if ran.fetch_add(1, Ordering::SeqCst) + 1 == 8 {
                        done.notify_one();
                    }
                }))
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), done.notified())
            .await
            .expect("tasks did not run");
        assert_eq!(ran.load(Ordering::SeqCst), 8);
        assert_eq!(queue.metrics.async_enqueued().value(), 8);
        queue.stop().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_without_waiting() {
        let queue = AsyncWriteQueue::new(2, 1, metrics()).unwrap();
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());

        // stall the only worker
        {
            let release = release.clone();
            let started = started.clone();
            queue
                .enqueue(AsyncTask::new(Op::Set, async move {
                    started.notify_one();
                    release.notified().await;
                }))
                .unwrap();
        }
        started.notified().await;

        queue.enqueue(AsyncTask::new(Op::Set, async {})).unwrap();
        queue.enqueue(AsyncTask::new(Op::Delete, async {})).unwrap();
        assert_eq!(queue.len(), 2);

        let start = Instant::now();
        let err = queue
            .enqueue(AsyncTask::new(Op::Set, async {}))
            .unwrap_err();
        assert!(matches!(err, ClientError::QueueFull));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(queue.metrics.async_rejected_full().value(), 1);
        assert_eq!(queue.metrics.async_enqueued().value(), 3);

        release.notify_one();
        queue.stop().await;
    }

    #[tokio::test]
    async fn stop_waits_for_running_task_and_drops_buffered() {
        let queue = AsyncWriteQueue::new(8, 1, metrics()).unwrap();
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        let buffered_ran = Arc::new(AtomicBool::new(false));

        {
            let started = started.clone();
            let finished = finished.clone();
            queue
                .enqueue(AsyncTask::new(Op::Set, async move {
                    started.notify_one();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.store(true, Ordering::SeqCst);
                }))
                .unwrap();
        }
        started.notified().await;

        for _ in 0..3 {
            let buffered_ran = buffered_ran.clone();
            queue
                .enqueue(AsyncTask::new(Op::Set, async move {
                    buffered_ran.store(true, Ordering::SeqCst);
                }))
                .unwrap();
        }

        queue.stop().await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(!buffered_ran.load(Ordering::SeqCst));
        assert_eq!(queue.metrics.async_dropped().value(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn worker_survives_panicking_task() {
        let queue = AsyncWriteQueue::new(4, 1, metrics()).unwrap();
        let done = Arc::new(Notify::new());

        queue
            .enqueue(AsyncTask::new(Op::Delete, async {
                panic!("boom");
            }))
            .unwrap();
        {
            let done = done.clone();
            queue
                .enqueue(AsyncTask::new(Op::Set, async move {
                    done.notify_one();
                }))
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), done.notified())
            .await
            .expect("worker died with the panicking task");
        queue.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_rejects_afterwards() {
        let queue = AsyncWriteQueue::new(4, 3, metrics()).unwrap();
        queue.stop().await;
        queue.stop().await;

        assert!(queue.is_stopped());
        let err = queue.enqueue(AsyncTask::new(Op::Set, async {})).unwrap_err();
        assert!(matches!(err, ClientError::QueueStopped));
        assert_eq!(queue.metrics.async_rejected_stopped().value(), 1);
        assert_eq!(queue.metrics.async_enqueued().value(), 0);
    }
}
