use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::response::Response;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default)]
pub struct ExecutorMetricsSnapshot {
    pub executions_started: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Default)]
struct ExecutorMetricsInner {
    executions_started: AtomicU64,
    executions_succeeded: AtomicU64,
    executions_failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicU64,
    latency_samples: AtomicU64,
    latency_total_ms: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

#[derive(Clone, Default)]
pub(crate) struct ExecutorMetrics {
    inner: Arc<ExecutorMetricsInner>,
}

pub(crate) struct InFlightGuard {
    metrics: ExecutorMetrics,
}

impl ExecutorMetrics {
    pub(crate) fn begin_execution(&self) -> InFlightGuard {
        self.inner.executions_started.fetch_add(1, Ordering::Relaxed);
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution_completed(
        &self,
        result: &Result<Response, Error>,
        latency: Duration,
    ) {
        self.record_latency(latency);
        match result {
            Ok(response) => {
                self.inner
                    .executions_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                self.add_status_count(response.status().as_u16());
            }
            Err(error) => {
                self.inner.executions_failed.fetch_add(1, Ordering::Relaxed);
                if let Some(response) = error.response() {
                    self.add_status_count(response.status().as_u16());
                }
                self.add_error_count(error.code().as_str());
            }
        }
    }

    pub(crate) fn snapshot(&self) -> ExecutorMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        ExecutorMetricsSnapshot {
            executions_started: self.inner.executions_started.load(Ordering::Relaxed),
            executions_succeeded: self.inner.executions_succeeded.load(Ordering::Relaxed),
            executions_failed: self.inner.executions_failed.load(Ordering::Relaxed),
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: &str) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key.to_owned()).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
