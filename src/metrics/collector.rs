// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub unavailable_total: IntCounterVec,

    // Backend metrics
    pub backend_forwards_total: IntCounterVec,
    pub backend_forward_duration_seconds: HistogramVec,
    pub backend_retries_total: IntCounterVec,
    pub backend_alive: IntGaugeVec,
    pub failovers_total: IntCounter,

    // Pool metrics
    pub alive_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("lb_request_duration_seconds", "Request duration in seconds"),
            &["outcome"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let unavailable_total = IntCounterVec::new(
            Opts::new(
                "lb_unavailable_total",
                "Requests answered with 503, by cause",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(unavailable_total.clone()))?;

        let backend_forwards_total = IntCounterVec::new(
            Opts::new("lb_backend_forwards_total", "Forward attempts per backend"),
            &["backend", "result"],
        )?;
        registry.register(Box::new(backend_forwards_total.clone()))?;

        let backend_forward_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_backend_forward_duration_seconds",
                "Duration of forward attempts",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_forward_duration_seconds.clone()))?;

        let backend_retries_total = IntCounterVec::new(
            Opts::new("lb_backend_retries_total", "Same-backend retries"),
            &["backend"],
        )?;
        registry.register(Box::new(backend_retries_total.clone()))?;

        let backend_alive = IntGaugeVec::new(
            Opts::new("lb_backend_alive", "Backend liveness (1=alive, 0=dead)"),
            &["backend"],
        )?;
        registry.register(Box::new(backend_alive.clone()))?;

        let failovers_total =
            IntCounter::new("lb_failovers_total", "Switches to another backend")?;
        registry.register(Box::new(failovers_total.clone()))?;

        let alive_backends = IntGauge::new("lb_alive_backends", "Number of live backends")?;
        registry.register(Box::new(alive_backends.clone()))?;

        let total_backends = IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            unavailable_total,
            backend_forwards_total,
            backend_forward_duration_seconds,
            backend_retries_total,
            backend_alive,
            failovers_total,
            alive_backends,
            total_backends,
        })
    }

    pub fn record_request(&self, outcome: &str, duration: Duration) {
        self.requests_total.with_label_values(&[outcome]).inc();
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    pub fn record_unavailable(&self, reason: &str) {
        self.unavailable_total.with_label_values(&[reason]).inc();
    }

    pub fn record_forward(&self, backend: &str, success: bool, duration: Duration) {
        let result = if success { "success" } else { "transport_error" };
        self.backend_forwards_total
            .with_label_values(&[backend, result])
            .inc();
        self.backend_forward_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_retry(&self, backend: &str) {
        self.backend_retries_total.with_label_values(&[backend]).inc();
    }

    pub fn record_failover(&self) {
        self.failovers_total.inc();
    }

    pub fn update_backend_alive(&self, backend: &str, alive: bool) {
        self.backend_alive
            .with_label_values(&[backend])
            .set(i64::from(alive));
    }

    pub fn update_backend_counts(&self, alive: usize, total: usize) {
        self.alive_backends.set(alive as i64);
        self.total_backends.set(total as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
