//! Prometheus metrics collection for crowdgate.
//!
//! Exposed on a separate HTTP port (see [`crate::http::run_metrics_server`]).
//!
//! - `crowdgate_requests_total{verdict,stage}` - Forward-auth outcomes by deciding stage
//! - `crowdgate_authority_requests_total{result}` - Decision API calls by result
//! - `crowdgate_authority_duration_seconds` - Decision API latency histogram
//! - `crowdgate_cache_lookups_total{result}` - Verdict cache hit/miss/error
//! - `crowdgate_cache_writes_total{result}` - Background Deny writes

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Forward-auth requests by verdict and the stage that produced it.
pub static REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Decision API calls by outcome (`allow`, `deny`, or an error code).
pub static AUTHORITY_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Verdict cache lookups by result.
pub static CACHE_LOOKUPS: OnceLock<IntCounterVec> = OnceLock::new();

/// Background Deny cache writes by result.
pub static CACHE_WRITES: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Decision API round-trip latency.
pub static AUTHORITY_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before metrics are recorded; recording
/// before that is a no-op.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(REQUESTS, IntCounterVec::new(Opts::new("crowdgate_requests_total", "Forward-auth requests by verdict and stage"), &["verdict", "stage"]));
    register!(AUTHORITY_REQUESTS, IntCounterVec::new(Opts::new("crowdgate_authority_requests_total", "Decision API requests by result"), &["result"]));
    register!(CACHE_LOOKUPS, IntCounterVec::new(Opts::new("crowdgate_cache_lookups_total", "Verdict cache lookups by result"), &["result"]));
    register!(CACHE_WRITES, IntCounterVec::new(Opts::new("crowdgate_cache_writes_total", "Deny verdict cache writes by result"), &["result"]));
    register!(AUTHORITY_LATENCY, Histogram::with_opts(
        HistogramOpts::new("crowdgate_authority_duration_seconds", "Decision API latency")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

fn inc(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

/// Record a forward-auth outcome.
#[inline]
pub fn record_request(verdict: &str, stage: &str) {
    inc(&REQUESTS, &[verdict, stage]);
}

/// Record a decision API call and its latency.
#[inline]
pub fn record_authority(result: &str, duration_secs: f64) {
    inc(&AUTHORITY_REQUESTS, &[result]);
    if let Some(h) = AUTHORITY_LATENCY.get() {
        h.observe(duration_secs);
    }
}

#[inline]
pub fn record_cache_lookup(result: &str) {
    inc(&CACHE_LOOKUPS, &[result]);
}

#[inline]
pub fn record_cache_write(result: &str) {
    inc(&CACHE_WRITES, &[result]);
}
