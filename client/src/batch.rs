//! Batched, gated multi-get.
//!
//! A request for N keys becomes `ceil(N / batch_size)` backend calls over
//! contiguous slices of the key list. The dispatcher takes a gate permit for
//! each batch before spawning it, so at most `max_concurrency` batches talk to
//! the backend at once. Each batch merges its hits into a per-call result set.
//! A batch that fails is logged and its keys are left out; it never fails the
//! call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::backend::{Backend, Lookup};
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::metrics::{ClientMetrics, Op};

type ResultSet = Arc<Mutex<HashMap<Bytes, Bytes>>>;

/// Half-open range `[start, end)` into a request's key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    pub start: usize,
    pub end: usize,
}

impl BatchRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `len` items into contiguous ranges of at most `batch_size`.
///
/// A `batch_size` of zero yields a single range covering everything.
pub fn batch_ranges(len: usize, batch_size: usize) -> impl Iterator<Item = BatchRange> {
    let step = if batch_size == 0 { len.max(1) } else { batch_size };
    (0..len).step_by(step).map(move |start| BatchRange {
        start,
        end: (start + step).min(len),
    })
}

/// Multi-get engine shared by every read on a client.
#[derive(Clone)]
pub struct BatchedMultiGet {
    backend: Arc<dyn Backend>,
    gate: ConcurrencyGate,
    batch_size: usize,
    metrics: Arc<ClientMetrics>,
}

impl BatchedMultiGet {
    pub fn new(
        backend: Arc<dyn Backend>,
        gate: ConcurrencyGate,
        batch_size: usize,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            backend,
            gate,
            batch_size,
            metrics,
        }
    }

    /// Fetch `keys`, returning every hit. Missing and failed keys are absent.
    ///
    /// Stops early when `cancel` completes: batches not yet admitted are
    /// skipped, batches in flight are aborted, and whatever had already
    /// merged is returned. Pass `std::future::pending()` to wait for all
    /// batches.
    pub async fn get_multi_or_cancel<F>(&self, keys: Arc<[Bytes]>, cancel: F) -> HashMap<Bytes, Bytes>
    where
        F: Future<Output = ()>,
    {
        let results: ResultSet = Arc::new(Mutex::new(HashMap::with_capacity(keys.len())));
        let mut tasks = JoinSet::new();
        let mut cancelled = false;
        tokio::pin!(cancel);

        for range in batch_ranges(keys.len(), self.batch_size) {
            let Ok(permit) = self.gate.acquire_or_cancel(&mut cancel).await else {
                cancelled = true;
                break;
            };
            tasks.spawn(fetch_batch(
                self.backend.clone(),
                keys.clone(),
                range,
                results.clone(),
                self.metrics.clone(),
                permit,
            ));
        }

        while !cancelled {
            tokio::select! {
                biased;
                _ = &mut cancel => cancelled = true,
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        warn!(name = self.metrics.name(), error = %e, "multi-get batch task failed");
                    }
                },
            }
        }

        if cancelled {
            tasks.abort_all();
            debug!(
                name = self.metrics.name(),
                items = keys.len(),
                "multi-get cancelled, returning partial results"
            );
        }

        // Aborted batches may still be unwinding; they merge into the
        // emptied map, not into the caller's snapshot.
        std::mem::take(&mut *results.lock())
    }
}

impl std::fmt::Debug for BatchedMultiGet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedMultiGet")
            .field("batch_size", &self.batch_size)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

async fn fetch_batch(
    backend: Arc<dyn Backend>,
    keys: Arc<[Bytes]>,
    range: BatchRange,
    results: ResultSet,
    metrics: Arc<ClientMetrics>,
    _permit: GatePermit,
) {
    let start = Instant::now();
    let op = metrics.op(Op::GetMulti);
    op.operations().increment();

    let batch = &keys[range.start..range.end];
    match backend.multi_get(batch).await {
        Ok(lookups) => {
            if lookups.len() != batch.len() {
                warn!(
                    name = metrics.name(),
                    expected = batch.len(),
                    got = lookups.len(),
                    "backend returned a mismatched multi-get response"
                );
            }

            let mut hits = Vec::with_capacity(lookups.len());
            let mut hit_bytes = 0;
            for (key, lookup) in batch.iter().zip(lookups) {
                match lookup {
                    Lookup::Hit(value) => {
                        hit_bytes += value.len();
                        hits.push((key.clone(), value));
                    }
                    Lookup::Miss => {}
                    Lookup::Unexpected(shape) => {
                        warn!(
                            name = metrics.name(),
                            key = %String::from_utf8_lossy(key),
                            shape = %shape,
                            "unexpected multi-get result type"
                        );
                    }
                }
            }

            results.lock().extend(hits);
            let _ = op.data_size().increment(hit_bytes as u64);
        }
        Err(e) => {
            op.failures(e.reason()).increment();
            warn!(
                name = metrics.name(),
                error = %e,
                items = batch.len(),
                "failed to get items from backend"
            );
        }
    }

    let _ = op.duration().increment(start.elapsed().as_nanos() as u64);
}
