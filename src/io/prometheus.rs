//! Prometheus text exposition of the service metrics
//!
//! Served at `GET /metrics` by `io::http`.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge)
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a counter split by an `outcome` label
fn write_labeled_counter(output: &mut String, name: &str, help: &str, values: &[(&str, u64)]) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (outcome, val) in values {
        let _ = writeln!(output, "{name}{{outcome=\"{outcome}\"}} {val}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_uplink_metrics(&mut output, &summary);
    write_observation_metrics(&mut output, &summary);
    write_latency_metrics(&mut output, &summary);
    write_metric(
        &mut output,
        "wifi_locator_history_size",
        "Position estimates currently held in history",
        MetricType::Gauge,
        summary.history_size,
    );

    output
}

fn write_uplink_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "wifi_locator_uplinks_total",
        "Uplinks processed by the pipeline",
        MetricType::Counter,
        summary.uplinks_total,
    );
    write_labeled_counter(
        output,
        "wifi_locator_uplink_outcomes_total",
        "Uplinks by processing outcome",
        &[
            ("success", summary.uplinks_success),
            ("no_data", summary.uplinks_no_data),
            ("error", summary.uplinks_failed),
        ],
    );
    write_metric(
        output,
        "wifi_locator_uplinks_rejected_total",
        "Uplink bodies that were not valid JSON",
        MetricType::Counter,
        summary.uplinks_rejected,
    );
}

fn write_observation_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "wifi_locator_observations_decoded_total",
        "Access point observations decoded from payloads",
        MetricType::Counter,
        summary.observations_decoded,
    );
    write_metric(
        output,
        "wifi_locator_observations_resolved_total",
        "Observations found in the access point repository",
        MetricType::Counter,
        summary.observations_resolved,
    );
    write_metric(
        output,
        "wifi_locator_observations_unresolved_total",
        "Observations not found in the access point repository",
        MetricType::Counter,
        summary.observations_unresolved,
    );
    write_metric(
        output,
        "wifi_locator_decode_diagnostics_total",
        "Payload decoding diagnostics emitted",
        MetricType::Counter,
        summary.decode_diagnostics,
    );
}

fn write_latency_metrics(output: &mut String, summary: &MetricsSummary) {
    write_histogram(
        output,
        "wifi_locator_uplink_latency_us",
        "Uplink processing latency in microseconds",
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.latency_sum_us,
    );
    write_metric(
        output,
        "wifi_locator_uplink_latency_p99_us",
        "99th percentile uplink latency",
        MetricType::Gauge,
        summary.lat_p99_us,
    );
}
