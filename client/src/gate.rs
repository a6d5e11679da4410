//! Counting admission gate for multi-get batches.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ClientError;
use crate::metrics::ClientMetrics;

/// Bounds how many batches may run against the backend at once.
///
/// Cloning is cheap and clones share permits. A limit of zero disables
/// gating: every acquire succeeds immediately.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Option<Arc<Semaphore>>,
    max_concurrency: usize,
    metrics: Arc<ClientMetrics>,
}

/// Admission held by one batch. Dropping it releases the slot.
#[must_use = "dropping the permit releases the gate slot immediately"]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
    metrics: Arc<ClientMetrics>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.metrics.gate_in_flight().decrement();
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit")
            .field("gated", &self._permit.is_some())
            .finish()
    }
}

impl ConcurrencyGate {
    pub fn new(max_concurrency: usize, metrics: Arc<ClientMetrics>) -> Result<Self, ClientError> {
        if max_concurrency > Semaphore::MAX_PERMITS {
            return Err(ClientError::Config(format!(
                "max get multi concurrency must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        let semaphore = (max_concurrency > 0).then(|| Arc::new(Semaphore::new(max_concurrency)));
        Ok(Self {
            semaphore,
            max_concurrency,
            metrics,
        })
    }

    pub fn is_unlimited(&self) -> bool {
        self.semaphore.is_none()
    }

    /// Permits currently free. `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Wait for a permit. Waiters are admitted in FIFO order.
    pub async fn acquire(&self) -> Result<GatePermit, ClientError> {
        let start = Instant::now();
        let permit = match &self.semaphore {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ClientError::Cancelled)?,
            ),
            None => None,
        };
        let _ = self
            .metrics
            .gate_wait()
            .increment(start.elapsed().as_nanos() as u64);
        self.metrics.gate_in_flight().increment();

        Ok(GatePermit {
            _permit: permit,
            metrics: self.metrics.clone(),
        })
    }

    /// Wait for a permit unless `cancel` completes first.
    ///
    /// A cancellation that is already complete wins over a free permit, so
    /// nothing is granted after the caller gave up.
    pub async fn acquire_or_cancel<F>(&self, cancel: F) -> Result<GatePermit, ClientError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => Err(ClientError::Cancelled),
            permit = self.acquire() => permit,
        }
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("max_concurrency", &self.max_concurrency)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metrics() -> Arc<ClientMetrics> {
        Arc::new(ClientMetrics::new("gate-test"))
    }

    #[tokio::test]
    async fn permits_are_bounded_and_released_on_drop() {
        let metrics = metrics();
        let gate = ConcurrencyGate::new(2, metrics.clone()).unwrap();

        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), Some(0));
        assert_eq!(metrics.gate_in_flight().value(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(blocked.is_err(), "third permit granted past the limit");

        drop(a);
        assert_eq!(gate.available(), Some(1));
        let c = gate.acquire().await.unwrap();

        drop(b);
        drop(c);
        assert_eq!(gate.available(), Some(2));
        assert_eq!(metrics.gate_in_flight().value(), 0);
    }

    #[tokio::test]
    async fn zero_means_unlimited() {
        let gate = ConcurrencyGate::new(0, metrics()).unwrap();
        assert!(gate.is_unlimited());
        assert_eq!(gate.available(), None);

        let mut permits = Vec::new();
        for _ in 0..1000 {
            permits.push(gate.acquire().await.unwrap());
        }
        assert_eq!(permits.len(), 1000);
    }

    #[test]
    fn rejects_limit_above_semaphore_maximum() {
        let err = ConcurrencyGate::new(Semaphore::MAX_PERMITS + 1, metrics()).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn cancelled_acquire_grants_nothing() {
        let metrics = metrics();
        let gate = ConcurrencyGate::new(1, metrics.clone()).unwrap();
        let held = gate.acquire().await.unwrap();

        let err = gate
            .acquire_or_cancel(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(metrics.gate_in_flight().value(), 1);

        drop(held);
        // already-fired cancellation wins over a free permit
        let err = gate.acquire_or_cancel(async {}).await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(gate.available(), Some(1));
    }

    #[tokio::test]
    async fn permit_released_when_holder_panics() {
        let gate = ConcurrencyGate::new(1, metrics()).unwrap();
        let task_gate = gate.clone();

        let result = tokio::spawn(async move {
            let _permit = task_gate.acquire().await.unwrap();
            panic!("batch failed");
        })
        .await;
        assert!(result.unwrap_err().is_panic());

        assert_eq!(gate.available(), Some(1));
    }
}
