//! Prometheus metrics, ported from the original's two `prometheus`
//! counters/summary (`resource_controller_errors_total`, `cleanup_run_total`,
//! `cleanup_duration_seconds`, `cleanup_error_total`) onto `prometheus-client`.

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub resource_errors: Counter,
    pub cleanup_runs: Counter,
    pub cleanup_errors: Counter,
    pub cleanup_duration: Histogram,
    registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::default();

        let resource_errors = Counter::default();
        registry.register(
            "resource_controller_errors",
            "Total number of errors encountered by the resource controller",
            resource_errors.clone(),
        );

        let cleanup_runs = Counter::default();
        registry.register(
            "cleanup_run",
            "Total number of invocations of the cleanup controller",
            cleanup_runs.clone(),
        );

        let cleanup_errors = Counter::default();
        registry.register(
            "cleanup_error",
            "Total number of errors encountered by the cleanup controller",
            cleanup_errors.clone(),
        );

        let cleanup_duration = Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0].into_iter());
        registry.register(
            "cleanup_duration_seconds",
            "Cleanup run latency distribution",
            cleanup_duration.clone(),
        );

        Self {
            resource_errors,
            cleanup_runs,
            cleanup_errors,
            cleanup_duration,
            registry: Arc::new(registry),
        }
    }
}

impl Metrics {
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    pub fn measure_cleanup(&self) -> CleanupMeasurer {
        self.cleanup_runs.inc();
        CleanupMeasurer {
            start: Instant::now(),
            histogram: self.cleanup_duration.clone(),
        }
    }
}

/// Records the cleanup run's duration into the histogram when dropped.
pub struct CleanupMeasurer {
    start: Instant,
    histogram: Histogram,
}

impl Drop for CleanupMeasurer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
