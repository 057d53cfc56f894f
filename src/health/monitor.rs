//! Periodic health monitor.
//!
//! Runs a liveness sweep over the whole pool on a fixed period.

use crate::backend::{BackendPool, SweepReport};
use crate::health::Probe;
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::info;

/// Background task that sweeps the pool every `interval`.
pub struct HealthMonitor {
    pool: Arc<BackendPool>,
    probe: Probe,
    interval: Duration,
    metrics: MetricsCollector,
}

impl HealthMonitor {
    pub fn new(
        pool: Arc<BackendPool>,
        probe: Probe,
        interval: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            pool,
            probe,
            interval,
            metrics,
        }
    }

    /// Run sweeps until shutdown.
    ///
    /// The first sweep happens one full interval after start; backends are
    /// assumed alive until then. Each sweep is awaited before the next tick
    /// and late ticks are skipped, so sweeps never overlap.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = %humantime::format_duration(self.interval),
            timeout = %humantime::format_duration(self.probe.timeout()),
            backends = self.pool.len(),
            "health monitor starting"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }

                _ = shutdown.recv() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Run one sweep and publish its results.
    pub async fn sweep(&self) -> SweepReport {
        info!("health check started");
        let report = self.pool.health_check(&self.probe).await;

        for outcome in &report.outcomes {
            self.metrics.record_health_check(&outcome.address, outcome.alive);
            self.metrics.set_backend_alive(&outcome.address, outcome.alive);
        }

        info!(
            alive = report.alive(),
            dead = report.dead(),
            "health check completed"
        );
        report
    }
}
