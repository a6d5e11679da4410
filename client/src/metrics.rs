use metriken::{AtomicHistogram, Counter, Gauge};

use crate::error::FailureReason;

/// Operation kinds tracked by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetMulti,
    Set,
    Delete,
}

impl Op {
    pub const ALL: [Op; 3] = [Op::GetMulti, Op::Set, Op::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::GetMulti => "get_multi",
            Op::Set => "set",
            Op::Delete => "delete",
        }
    }
}

/// Per-operation metrics.
///
/// Durations are recorded in nanoseconds, data sizes in bytes.
pub struct OpMetrics {
    operations: Counter,
    failures: [Counter; FailureReason::ALL.len()],
    duration: AtomicHistogram,
    data_size: AtomicHistogram,
}

impl OpMetrics {
    fn new() -> Self {
        Self {
            operations: Counter::new(),
            failures: std::array::from_fn(|_| Counter::new()),
            duration: AtomicHistogram::new(7, 64),
            data_size: AtomicHistogram::new(7, 64),
        }
    }

    /// `operations_total{op}`.
    pub fn operations(&self) -> &Counter {
        &self.operations
    }

    /// `operations_failed_total{op, reason}`.
    pub fn failures(&self, reason: FailureReason) -> &Counter {
        &self.failures[reason.index()]
    }

    /// Sum of failures across all reasons.
    pub fn failures_total(&self) -> u64 {
        self.failures.iter().map(|c| c.value()).sum()
    }

    /// `operation_duration{op}` (nanoseconds).
    pub fn duration(&self) -> &AtomicHistogram {
        &self.duration
    }

    /// `data_size_bytes{op}`.
    pub fn data_size(&self) -> &AtomicHistogram {
        &self.data_size
    }
}

/// Metrics owned by a single client. Not globally registered.
pub struct ClientMetrics {
    name: String,
    get_multi: OpMetrics,
    set: OpMetrics,
    delete: OpMetrics,
    skipped_oversized: Counter,
    async_enqueued: Counter,
    async_rejected_full: Counter,
    async_rejected_stopped: Counter,
    async_dropped: Counter,
    async_queue_latency: AtomicHistogram,
    gate_in_flight: Gauge,
    gate_wait: AtomicHistogram,
}

impl ClientMetrics {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            get_multi: OpMetrics::new(),
            set: OpMetrics::new(),
            delete: OpMetrics::new(),
            skipped_oversized: Counter::new(),
            async_enqueued: Counter::new(),
            async_rejected_full: Counter::new(),
            async_rejected_stopped: Counter::new(),
            async_dropped: Counter::new(),
            async_queue_latency: AtomicHistogram::new(7, 64),
            gate_in_flight: Gauge::new(),
            gate_wait: AtomicHistogram::new(7, 64),
        }
    }

    /// Client name these metrics belong to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self, op: Op) -> &OpMetrics {
        match op {
            Op::GetMulti => &self.get_multi,
            Op::Set => &self.set,
            Op::Delete => &self.delete,
        }
    }

    /// Writes rejected by the size guard.
    pub fn skipped_oversized(&self) -> &Counter {
        &self.skipped_oversized
    }

    /// Tasks accepted by the async write queue.
    pub fn async_enqueued(&self) -> &Counter {
        &self.async_enqueued
    }

    /// Tasks rejected because the queue buffer was full.
    pub fn async_rejected_full(&self) -> &Counter {
        &self.async_rejected_full
    }

    /// Tasks rejected because the queue was stopped.
    pub fn async_rejected_stopped(&self) -> &Counter {
        &self.async_rejected_stopped
    }

    /// Buffered tasks discarded when the queue stopped.
    pub fn async_dropped(&self) -> &Counter {
        &self.async_dropped
    }

    /// Time from enqueue to start of execution (nanoseconds).
    pub fn async_queue_latency(&self) -> &AtomicHistogram {
        &self.async_queue_latency
    }

    /// Multi-get batches currently holding a gate permit.
    pub fn gate_in_flight(&self) -> &Gauge {
        &self.gate_in_flight
    }

    /// Time spent waiting for a gate permit (nanoseconds).
    pub fn gate_wait(&self) -> &AtomicHistogram {
        &self.gate_wait
    }

    /// Snapshot of every counter, named in exposition style.
    pub fn counter_values(&self) -> Vec<(String, u64)> {
        let name = &self.name;
        let mut values = Vec::new();

        for op in Op::ALL {
            let m = self.op(op);
            values.push((
                format!("operations_total{{name=\"{name}\",op=\"{}\"}}", op.as_str()),
                m.operations.value(),
            ));
            for reason in FailureReason::ALL {
                let count = m.failures(reason).value();
                if count > 0 {
                    values.push((
                        format!(
                            "operations_failed_total{{name=\"{name}\",op=\"{}\",reason=\"{}\"}}",
                            op.as_str(),
                            reason.as_str()
                        ),
                        count,
                    ));
                }
            }
        }

        values.push((
            format!("operations_skipped_total{{name=\"{name}\",op=\"set\",reason=\"max-item-size\"}}"),
            self.skipped_oversized.value(),
        ));
        values.push((
            format!("async_enqueued_total{{name=\"{name}\"}}"),
            self.async_enqueued.value(),
        ));
        values.push((
            format!("async_rejected_total{{name=\"{name}\",reason=\"full\"}}"),
            self.async_rejected_full.value(),
        ));
        values.push((
            format!("async_rejected_total{{name=\"{name}\",reason=\"stopped\"}}"),
            self.async_rejected_stopped.value(),
        ));
        values.push((
            format!("async_dropped_total{{name=\"{name}\"}}"),
            self.async_dropped.value(),
        ));

        values
    }
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("name", &self.name)
            .field("get_multi", &self.get_multi.operations.value())
            .field("set", &self.set.operations.value())
            .field("delete", &self.delete.operations.value())
            .field("async_enqueued", &self.async_enqueued.value())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_labels() {
        let labels: Vec<_> = Op::ALL.iter().map(|op| op.as_str()).collect();
        assert_eq!(labels, ["get_multi", "set", "delete"]);
    }

    #[test]
    fn failures_are_tracked_per_reason() {
        let metrics = ClientMetrics::new("test");
        let set = metrics.op(Op::Set);
        set.failures(FailureReason::Timeout).increment();
        set.failures(FailureReason::Timeout).increment();
        set.failures(FailureReason::Server).increment();

        assert_eq!(set.failures(FailureReason::Timeout).value(), 2);
        assert_eq!(set.failures(FailureReason::Server).value(), 1);
        assert_eq!(set.failures_total(), 3);
        assert_eq!(metrics.op(Op::Delete).failures_total(), 0);
    }

    #[test]
    fn counter_listing() {
        let metrics = ClientMetrics::new("sessions");
        metrics.op(Op::GetMulti).operations().add(3);
        metrics.op(Op::GetMulti).failures(FailureReason::Closed).increment();
        metrics.async_rejected_full().increment();

        let values = metrics.counter_values();
        let lookup = |name: &str| values.iter().find(|(n, _)| n == name).map(|(_, v)| *v);

        assert_eq!(
            lookup("operations_total{name=\"sessions\",op=\"get_multi\"}"),
            Some(3)
        );
        assert_eq!(
            lookup("operations_failed_total{name=\"sessions\",op=\"get_multi\",reason=\"closed\"}"),
            Some(1)
        );
        assert_eq!(
            lookup("async_rejected_total{name=\"sessions\",reason=\"full\"}"),
            Some(1)
        );
        // zero failure counters are omitted
        assert_eq!(
            lookup("operations_failed_total{name=\"sessions\",op=\"set\",reason=\"timeout\"}"),
            None
        );
    }

    #[test]
    fn histograms_start_empty() {
        let metrics = ClientMetrics::new("test");
        assert!(metrics.op(Op::Set).duration().load().is_none());

        let _ = metrics.op(Op::Set).duration().increment(1_000);
        assert!(metrics.op(Op::Set).duration().load().is_some());
    }
}
