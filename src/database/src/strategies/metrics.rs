use cleanup_shared::CleanupPerformanceMetrics;
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};

/// Splits a cleanup run's wall time into connection and query time
#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    started: Instant,
    connection: Duration,
    queries: Duration,
}

impl MetricsRecorder {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            connection: Duration::ZERO,
            queries: Duration::ZERO,
        }
    }

    pub(crate) async fn connect<F, T>(&mut self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let output = call.await;
        self.connection += started.elapsed();
        output
    }

    pub(crate) async fn query<F, T>(&mut self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let output = call.await;
        self.queries += started.elapsed();
        output
    }

    /// `memory` is `(used, peak)` in bytes when the backend reports it
    pub(crate) fn finish(
        &self,
        records_removed: u64,
        memory: Option<(u64, u64)>,
    ) -> CleanupPerformanceMetrics {
        let total = self.started.elapsed();
        let total_ms = total.as_millis() as u64;
        let busy = self.connection + self.queries;

        let cpu_usage_percent = if total.is_zero() {
            0.0
        } else {
            (busy.as_secs_f64() / total.as_secs_f64() * 100.0).min(100.0)
        };
        let (memory_used_bytes, peak_memory_usage_bytes) = memory.unwrap_or((0, 0));

        CleanupPerformanceMetrics {
            connection_time_ms: self.connection.as_millis() as u64,
            query_execution_time_ms: self.queries.as_millis() as u64,
            total_cleanup_time_ms: total_ms,
            memory_used_bytes,
            cpu_usage_percent,
            operations_per_second: CleanupPerformanceMetrics::operations_per_second(
                records_removed,
                total_ms,
            ),
            peak_memory_usage_bytes,
        }
    }
}

/// Last metrics recorded by a strategy
#[derive(Debug, Default)]
pub(crate) struct MetricsSlot(Mutex<Option<CleanupPerformanceMetrics>>);

impl MetricsSlot {
    pub(crate) fn record(&self, metrics: CleanupPerformanceMetrics) {
        *self.0.lock() = Some(metrics);
    }

    pub(crate) fn latest(&self) -> Option<CleanupPerformanceMetrics> {
        self.0.lock().clone()
    }
}
