//! Queueing, batching and limiting layer for a remote key/value cache.
//!
//! [`RemoteCacheClient`] sits in front of any [`Backend`] driver and adds:
//!
//! - an asynchronous, bounded write queue so `set`/`delete` never wait on the
//!   backend,
//! - batched multi-gets with a cap on how many batches run at once,
//! - a size ceiling on written values.
//!
//! Writes are best effort. A write that fails on the backend is logged and
//! counted, never reported to the caller. Reads never fail: a key that could
//! not be fetched is reported as a miss.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use remote_cache_client::{ClientConfig, MemoryBackend, RemoteCacheClient};
//!
//! # async fn example() -> Result<(), remote_cache_client::ClientError> {
//! let client = RemoteCacheClient::new(
//!     "sessions",
//!     ClientConfig::default(),
//!     Arc::new(MemoryBackend::new()),
//! )?;
//!
//! client.set_async(b"hello", &b"world"[..], Duration::from_secs(60))?;
//!
//! let hits = client.get_multi(&[b"hello"]).await;
//! println!("{} hits", hits.len());
//!
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

mod backend;
mod batch;
mod config;
mod error;
mod gate;
mod item;
pub mod logging;
mod memory;
mod metrics;
mod queue;

pub use backend::{Backend, Lookup};
pub use batch::{BatchRange, BatchedMultiGet, batch_ranges};
pub use config::{ClientConfig, LoggingConfig, parse_size};
pub use error::{BackendError, ClientError, FailureReason};
pub use gate::{ConcurrencyGate, GatePermit};
pub use item::{CacheItem, SizeGuard};
pub use memory::MemoryBackend;
pub use metrics::{ClientMetrics, Op, OpMetrics};
pub use queue::{AsyncTask, AsyncWriteQueue};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// Remote cache client.
///
/// Clone-able, Send + Sync. All clones share the same queue, gate and
/// backend. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct RemoteCacheClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    backend: Arc<dyn Backend>,
    size_guard: SizeGuard,
    queue: AsyncWriteQueue,
    reader: BatchedMultiGet,
    metrics: Arc<ClientMetrics>,
    stopped: AtomicBool,
    shutdown: OnceCell<()>,
}

impl RemoteCacheClient {
    /// Build a client over `backend` and start its write workers.
    pub fn new(
        name: impl Into<String>,
        config: ClientConfig,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let metrics = Arc::new(ClientMetrics::new(name));
        let queue = AsyncWriteQueue::new(
            config.max_async_buffer_size,
            config.max_async_concurrency,
            metrics.clone(),
        )?;
        let gate = ConcurrencyGate::new(config.max_get_multi_concurrency, metrics.clone())?;
        let reader = BatchedMultiGet::new(
            backend.clone(),
            gate,
            config.get_multi_batch_size,
            metrics.clone(),
        );

        info!(
            name = metrics.name(),
            max_item_size = config.max_item_size,
            async_workers = config.max_async_concurrency,
            async_buffer = config.max_async_buffer_size,
            get_multi_concurrency = config.max_get_multi_concurrency,
            get_multi_batch_size = config.get_multi_batch_size,
            "remote cache client started"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                backend,
                size_guard: SizeGuard::new(config.max_item_size),
                queue,
                reader,
                metrics,
                stopped: AtomicBool::new(false),
                shutdown: OnceCell::new(),
            }),
        })
    }

    /// Queue a write of `value` under `key`. Returns once the write is queued,
    /// not once it reached the backend.
    ///
    /// Accepts any type that converts to `Bytes`. Pass `Bytes` directly to
    /// avoid a copy.
    pub fn set_async(
        &self,
        key: &[u8],
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<(), ClientError> {
        self.check_accepting()?;
        if key.is_empty() {
            return Err(ClientError::EmptyKey);
        }

        let item = CacheItem::new(Bytes::copy_from_slice(key), value, ttl);
        if !self.inner.size_guard.permits(&item) {
            self.inner.metrics.skipped_oversized().increment();
            return Err(ClientError::SizeExceeded {
                size: item.size(),
                max: self.inner.size_guard.max_item_size(),
            });
        }

        let backend = self.inner.backend.clone();
        let key = item.key.clone();
        let write = async move { backend.set(&item.key, item.value, item.ttl).await };
        self.inner.queue.enqueue(AsyncTask::new(
            Op::Set,
            run_write(self.inner.metrics.clone(), Op::Set, key, write),
        ))
    }

    /// Queue a delete of `key`. Deleting a key that does not exist is not an
    /// error.
    pub fn delete(&self, key: &[u8]) -> Result<(), ClientError> {
        self.check_accepting()?;
        if key.is_empty() {
            return Err(ClientError::EmptyKey);
        }

        let backend = self.inner.backend.clone();
        let key = Bytes::copy_from_slice(key);
        let target = key.clone();
        let write = async move { backend.delete(&target).await };
        self.inner.queue.enqueue(AsyncTask::new(
            Op::Delete,
            run_write(self.inner.metrics.clone(), Op::Delete, key, write),
        ))
    }

    /// Fetch `keys`. The result holds only hits; misses, keys of failed
    /// batches and values of unexpected shape are absent.
    pub async fn get_multi<K: AsRef<[u8]>>(&self, keys: &[K]) -> HashMap<Bytes, Bytes> {
        self.get_multi_or_cancel(keys, std::future::pending()).await
    }

    /// Like [`get_multi`](Self::get_multi), but returns early with the hits
    /// gathered so far once `cancel` completes.
    pub async fn get_multi_or_cancel<K, F>(&self, keys: &[K], cancel: F) -> HashMap<Bytes, Bytes>
    where
        K: AsRef<[u8]>,
        F: Future<Output = ()>,
    {
        if keys.is_empty() {
            return HashMap::new();
        }
        if self.is_stopped() {
            debug!(
                name = self.name(),
                items = keys.len(),
                "client stopped, skipping multi-get"
            );
            return HashMap::new();
        }

        let keys: Arc<[Bytes]> = keys
            .iter()
            .map(|k| Bytes::copy_from_slice(k.as_ref()))
            .collect();
        self.inner.reader.get_multi_or_cancel(keys, cancel).await
    }

    /// Stop the write queue, waiting for running writes, then close the
    /// backend. Queued writes that have not started are dropped.
    ///
    /// Shutdown runs once. Every caller, including concurrent ones, returns
    /// only after it has finished.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner
            .shutdown
            .get_or_init(|| async {
                self.inner.queue.stop().await;
                if let Err(e) = self.inner.backend.close().await {
                    error!(name = self.name(), error = %e, "failed to close backend");
                }
                info!(name = self.name(), "remote cache client stopped");
            })
            .await;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        self.inner.metrics.name()
    }

    /// Operation and queue metrics for this client.
    pub fn metrics(&self) -> &ClientMetrics {
        &self.inner.metrics
    }

    /// Writes queued but not yet picked up by a worker.
    pub fn pending_writes(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn max_item_size(&self) -> usize {
        self.inner.size_guard.max_item_size()
    }

    // Once stopped, writes are refused as stopped before any other check.
    fn check_accepting(&self) -> Result<(), ClientError> {
        if self.is_stopped() || self.inner.queue.is_stopped() {
            self.inner.metrics.async_rejected_stopped().increment();
            return Err(ClientError::QueueStopped);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCacheClient")
            .field("name", &self.name())
            .field("max_item_size", &self.max_item_size())
            .field("pending_writes", &self.pending_writes())
            .field("reader", &self.inner.reader)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Execute one queued write, recording its count, duration and failure
/// reason.
async fn run_write<F>(metrics: Arc<ClientMetrics>, op: Op, key: Bytes, write: F)
where
    F: Future<Output = Result<(), BackendError>>,
{
    let start = Instant::now();
    let m = metrics.op(op);
    m.operations().increment();

    if let Err(e) = write.await {
        m.failures(e.reason()).increment();
        debug!(
            name = metrics.name(),
            op = op.as_str(),
            key = %String::from_utf8_lossy(&key),
            reason = e.reason().as_str(),
            error = %e,
            "failed to write item to backend"
        );
    }

    let _ = m.duration().increment(start.elapsed().as_nanos() as u64);
}
