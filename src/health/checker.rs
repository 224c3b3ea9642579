// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodically probes every backend and rewrites its liveness flag. This is
/// the only path by which a dead backend returns to rotation.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub alive: usize,
    pub dead: usize,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            config,
            pool,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.start())
    }

    /// Runs cycles until shutdown. A cycle finishes before the next tick is
    /// taken, so cycles never overlap.
    pub async fn start(self: Arc<Self>) {
        let period = self.config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Starting health checker with interval: {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One cycle: probe each backend in order and store the result.
    pub async fn check_all(&self) -> HealthReport {
        info!("Performing health check");

        let mut report = HealthReport { alive: 0, dead: 0 };
        for backend in self.pool.backends() {
            if self.check_backend(backend).await {
                report.alive += 1;
            } else {
                report.dead += 1;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(report.alive, self.pool.len());
        }

        info!(
            "Health check completed: {} alive, {} dead",
            report.alive, report.dead
        );
        report
    }

    async fn check_backend(&self, backend: &Backend) -> bool {
        let alive = if self.inject_failure() {
            debug!(backend = %backend.id, "Simulating probe failure");
            false
        } else {
            backend.probe().await
        };

        let was_alive = backend.set_alive(alive).await;
        debug!("({}) backend ping returned {}", backend.url, alive);

        if alive && !was_alive {
            info!(backend = %backend.id, "Backend is back in rotation");
        } else if !alive && was_alive {
            warn!(backend = %backend.id, "Backend failed its probe, removed from rotation");
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_alive(&backend.id, alive);
        }

        alive
    }

    fn inject_failure(&self) -> bool {
        let rate = self.config.simulated_failure_rate;
        rate > 0.0 && rand::thread_rng().gen_bool(rate)
    }
}
