//! Worker statistics: message outcomes, inference latency and score
//! distribution, summarized periodically and at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_SAMPLES: usize = 10_000;

/// Metrics collector for the worker pipeline
pub struct PipelineMetrics {
    /// Messages handed to the pipeline
    pub received: AtomicU64,
    /// HIGH-priority transactions written to the store
    pub persisted: AtomicU64,
    /// LOW-priority transactions acknowledged without persistence
    pub dropped: AtomicU64,
    /// HIGH-priority redeliveries already present in the store
    pub duplicates: AtomicU64,
    /// Undecodable messages terminated without redelivery
    pub rejected: AtomicU64,
    /// Messages handed back to the broker after a transient failure
    pub requeued: AtomicU64,
    /// Inference times in milliseconds
    inference_times: RwLock<Vec<f64>>,
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            inference_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed classification
    pub fn record_classification(&self, inference_time_ms: f64, risk_score: f64) {
        if let Ok(mut times) = self.inference_times.write() {
            times.push(inference_time_ms);
            if times.len() > MAX_SAMPLES {
                times.drain(0..MAX_SAMPLES / 2);
            }
        }

        let bucket = (risk_score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages settled with an ack or a terminate
    pub fn completed(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
            + self.dropped.load(Ordering::Relaxed)
            + self.duplicates.load(Ordering::Relaxed)
            + self.rejected.load(Ordering::Relaxed)
    }

    /// Inference time percentiles over the retained samples
    pub fn inference_stats(&self) -> InferenceStats {
        let mut sorted = match self.inference_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return InferenceStats::default(),
        };
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        InferenceStats {
            count: count as u64,
            mean_ms: sorted.iter().sum::<f64>() / count as f64,
            p50_ms: at(0.50),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
            max_ms: sorted[count - 1],
        }
    }

    /// Settled messages per second since startup
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.completed() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    /// Log a summary of everything recorded so far
    pub fn print_summary(&self) {
        let inference = self.inference_stats();

        info!(
            received = self.received.load(Ordering::Relaxed),
            persisted = self.persisted.load(Ordering::Relaxed),
            dropped = self.dropped.load(Ordering::Relaxed),
            duplicates = self.duplicates.load(Ordering::Relaxed),
            rejected = self.rejected.load(Ordering::Relaxed),
            requeued = self.requeued.load(Ordering::Relaxed),
            throughput = format!("{:.1} msg/s", self.throughput()),
            "Pipeline summary"
        );
        info!(
            classified = inference.count,
            mean_ms = format!("{:.1}", inference.mean_ms),
            p50_ms = inference.p50_ms,
            p95_ms = inference.p95_ms,
            p99_ms = inference.p99_ms,
            max_ms = inference.max_ms,
            "Inference time"
        );

        let distribution = self.score_distribution();
        let total: u64 = distribution.iter().sum();
        if total == 0 {
            return;
        }
        for (i, &count) in distribution.iter().enumerate() {
            let pct = count as f64 / total as f64 * 100.0;
            info!(
                "  risk {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                "█".repeat(((pct / 2.0) as usize).min(20))
            );
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Inference time statistics in milliseconds
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InferenceStats {
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Logs a metrics summary at a fixed interval
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    /// Report until the task is aborted
    pub async fn start(self) {
        let mut interval = tokio::time::interval(self.interval);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
