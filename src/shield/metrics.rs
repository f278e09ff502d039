//! Prometheus metrics for the shield.
//!
//! Cheap to clone (all inner types are `Arc`-based). Rendered on
//! `GET /metrics` in text exposition format.

use prometheus::{self, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct ShieldMetrics {
    registry: Registry,

    /// Completed requests, by outcome ("allowed", "blocked", "upstream_error").
    pub requests_total: IntCounterVec,

    /// Blocked requests, by block kind.
    pub blocks_total: IntCounterVec,

    /// Tokens saved by sieve compression across all forwarded requests.
    pub tokens_saved_total: IntCounter,

    /// Upstream tokens consumed (prompt + completion) across all completions.
    pub upstream_tokens_total: IntCounter,

    /// Requests currently in flight.
    pub requests_active: IntGauge,
}

impl ShieldMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("ward_requests_total", "Completed requests by outcome"),
            &["outcome"],
        )
        .expect("metric can be created");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric can be registered");

        let blocks_total = IntCounterVec::new(
            Opts::new("ward_blocks_total", "Blocked requests by kind"),
            &["kind"],
        )
        .expect("metric can be created");
        registry
            .register(Box::new(blocks_total.clone()))
            .expect("metric can be registered");

        let tokens_saved_total = IntCounter::with_opts(Opts::new(
            "ward_tokens_saved_total",
            "Tokens saved by sieve compression",
        ))
        .expect("metric can be created");
        registry
            .register(Box::new(tokens_saved_total.clone()))
            .expect("metric can be registered");

        let upstream_tokens_total = IntCounter::with_opts(Opts::new(
            "ward_upstream_tokens_total",
            "Upstream tokens consumed by completions",
        ))
        .expect("metric can be created");
        registry
            .register(Box::new(upstream_tokens_total.clone()))
            .expect("metric can be registered");

        let requests_active = IntGauge::with_opts(Opts::new(
            "ward_requests_active",
            "Requests currently in flight",
        ))
        .expect("metric can be created");
        registry
            .register(Box::new(requests_active.clone()))
            .expect("metric can be registered");

        Self {
            registry,
            requests_total,
            blocks_total,
            tokens_saved_total,
            upstream_tokens_total,
            requests_active,
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&metric_families, &mut buf)
            .expect("encoding metrics");
        String::from_utf8(buf).expect("metrics are valid UTF-8")
    }
}

impl Default for ShieldMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight gauge on drop.
pub struct RequestGuard {
    gauge: IntGauge,
}

impl RequestGuard {
    pub fn new(metrics: &ShieldMetrics) -> Self {
        metrics.requests_active.inc();
        Self {
            gauge: metrics.requests_active.clone(),
        }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
