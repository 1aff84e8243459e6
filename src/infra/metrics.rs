//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention. All
//! counters and the latency histogram are monotonic, so `/metrics` scrapes
//! and the periodic log reporter never interfere: `report()` derives
//! per-interval figures from the difference to its previous call, while
//! `snapshot()` returns the cumulative values.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not drive pipeline decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// How a single uplink ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    Success,
    NoData,
    Failed,
}

/// Cumulative values seen by the previous `report()` call
struct ReportMark {
    at: Instant,
    uplinks_total: u64,
    latency_buckets: [u64; NUM_BUCKETS],
    latency_sum_us: u64,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Uplinks handed to the pipeline
    uplinks_total: AtomicU64,
    /// Uplinks that produced a position
    uplinks_success: AtomicU64,
    /// Uplinks without a usable position
    uplinks_no_data: AtomicU64,
    /// Uplinks that hit an internal failure
    uplinks_failed: AtomicU64,
    /// Webhook/MQTT bodies that could not be parsed
    uplinks_rejected: AtomicU64,
    /// Observations produced by the decoder
    observations_decoded: AtomicU64,
    /// Observations found in the repository
    observations_resolved: AtomicU64,
    /// Decoder diagnostics emitted
    decode_diagnostics: AtomicU64,
    /// Processing latency histogram
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of latencies in microseconds
    latency_sum_us: AtomicU64,
    /// Max latency in microseconds since startup
    latency_max_us: AtomicU64,
    /// Max latency in microseconds since the previous report (reset on report)
    interval_max_us: AtomicU64,
    /// Largest history size seen; the history never shrinks
    history_size: AtomicU64,
    started_at: Instant,
    /// Only accessed from the reporter
    last_report: parking_lot::Mutex<ReportMark>,
}

impl Metrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            uplinks_total: AtomicU64::new(0),
            uplinks_success: AtomicU64::new(0),
            uplinks_no_data: AtomicU64::new(0),
            uplinks_failed: AtomicU64::new(0),
            uplinks_rejected: AtomicU64::new(0),
            observations_decoded: AtomicU64::new(0),
            observations_resolved: AtomicU64::new(0),
            decode_diagnostics: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            interval_max_us: AtomicU64::new(0),
            history_size: AtomicU64::new(0),
            started_at: now,
            last_report: parking_lot::Mutex::new(ReportMark {
                at: now,
                uplinks_total: 0,
                latency_buckets: [0; NUM_BUCKETS],
                latency_sum_us: 0,
            }),
        }
    }

    /// Record a finished uplink with its processing latency (lock-free)
    #[inline]
    pub fn record_uplink(&self, outcome: UplinkOutcome, latency_us: u64) {
        let counter = match outcome {
            UplinkOutcome::Success => &self.uplinks_success,
            UplinkOutcome::NoData => &self.uplinks_no_data,
            UplinkOutcome::Failed => &self.uplinks_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.uplinks_total.fetch_add(1, Ordering::Relaxed);

        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        update_atomic_max(&self.interval_max_us, latency_us);
    }

    /// Record an uplink body that never reached the pipeline
    #[inline]
    pub fn record_rejected(&self) {
        self.uplinks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decoded(&self, observations: usize, diagnostics: usize) {
        self.observations_decoded.fetch_add(observations as u64, Ordering::Relaxed);
        self.decode_diagnostics.fetch_add(diagnostics as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_resolved(&self, resolved: usize) {
        self.observations_resolved.fetch_add(resolved as u64, Ordering::Relaxed);
    }

    /// Record the history size returned by an append. Appends can finish out
    /// of order, so the gauge keeps the largest size reported.
    #[inline]
    pub fn observe_history_size(&self, size: usize) {
        update_atomic_max(&self.history_size, size as u64);
    }

    #[inline]
    pub fn uplinks_total(&self) -> u64 {
        self.uplinks_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn uplinks_failed(&self) -> u64 {
        self.uplinks_failed.load(Ordering::Relaxed)
    }

    /// Cumulative view since startup, for Prometheus scrapes. Does not reset.
    pub fn snapshot(&self) -> MetricsSummary {
        let uplinks_total = self.uplinks_total();
        let elapsed_secs = self.started_at.elapsed().as_secs_f64();
        self.summarize(
            per_sec(uplinks_total, elapsed_secs),
            load_buckets(&self.latency_buckets),
            self.latency_sum_us.load(Ordering::Relaxed),
            self.latency_max_us.load(Ordering::Relaxed),
        )
    }

    /// View of the interval since the previous report, for the log reporter.
    /// Counters stay cumulative; rate, latency histogram, percentiles and max
    /// cover the interval only.
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let uplinks_total = self.uplinks_total();
        let buckets = load_buckets(&self.latency_buckets);
        let latency_sum = self.latency_sum_us.load(Ordering::Relaxed);

        let (rate, interval_buckets, interval_sum) = {
            let mut last = self.last_report.lock();
            let elapsed_secs = now.duration_since(last.at).as_secs_f64();
            let rate = per_sec(uplinks_total.saturating_sub(last.uplinks_total), elapsed_secs);
            let interval: [u64; NUM_BUCKETS] =
                std::array::from_fn(|i| buckets[i].saturating_sub(last.latency_buckets[i]));
            let sum = latency_sum.saturating_sub(last.latency_sum_us);
            *last = ReportMark {
                at: now,
                uplinks_total,
                latency_buckets: buckets,
                latency_sum_us: latency_sum,
            };
            (rate, interval, sum)
        };

        let max_latency = self.interval_max_us.swap(0, Ordering::Relaxed);
        self.summarize(rate, interval_buckets, interval_sum, max_latency)
    }

    fn summarize(
        &self,
        uplinks_per_sec: f64,
        lat_buckets: [u64; NUM_BUCKETS],
        latency_sum_us: u64,
        max_latency_us: u64,
    ) -> MetricsSummary {
        let latency_count: u64 = lat_buckets.iter().sum();
        let avg_latency_us = if latency_count > 0 { latency_sum_us / latency_count } else { 0 };

        let observations_decoded = self.observations_decoded.load(Ordering::Relaxed);
        let observations_resolved = self.observations_resolved.load(Ordering::Relaxed);

        MetricsSummary {
            uplinks_total: self.uplinks_total.load(Ordering::Relaxed),
            uplinks_success: self.uplinks_success.load(Ordering::Relaxed),
            uplinks_no_data: self.uplinks_no_data.load(Ordering::Relaxed),
            uplinks_failed: self.uplinks_failed.load(Ordering::Relaxed),
            uplinks_rejected: self.uplinks_rejected.load(Ordering::Relaxed),
            uplinks_per_sec,
            observations_decoded,
            observations_resolved,
            observations_unresolved: observations_decoded.saturating_sub(observations_resolved),
            decode_diagnostics: self.decode_diagnostics.load(Ordering::Relaxed),
            latency_sum_us,
            avg_latency_us,
            max_latency_us,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            history_size: self.history_size.load(Ordering::Relaxed),
        }
    }
}

#[inline]
fn per_sec(count: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        0.0
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uplinks_total: u64,
    pub uplinks_success: u64,
    pub uplinks_no_data: u64,
    pub uplinks_failed: u64,
    pub uplinks_rejected: u64,
    pub uplinks_per_sec: f64,
    pub observations_decoded: u64,
    pub observations_resolved: u64,
    pub observations_unresolved: u64,
    pub decode_diagnostics: u64,
    pub latency_sum_us: u64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub history_size: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uplinks_total = %self.uplinks_total,
            uplinks_per_sec = format!("{:.2}", self.uplinks_per_sec),
            success = %self.uplinks_success,
            no_data = %self.uplinks_no_data,
            failed = %self.uplinks_failed,
            rejected = %self.uplinks_rejected,
            aps_resolved = %self.observations_resolved,
            aps_unresolved = %self.observations_unresolved,
            avg_latency_us = %self.avg_latency_us,
            p99_us = %self.lat_p99_us,
            history_size = %self.history_size,
            "metrics"
        );
    }
}
