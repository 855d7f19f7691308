//! Probe and reconcile loop
//!
//! Runs probe → classify → reconcile, then sleeps for the configured
//! interval. Cycles never overlap and carry nothing over from one to the
//! next; a shutdown signal is only observed while sleeping, so a cycle is
//! never abandoned halfway through its mutations.

use crate::health::{components, HealthRegistry};
use crate::models::{ControlPlaneEndpoint, ProbeResult};
use crate::observability::{SentryLogger, SentryMetrics};
use crate::probe::ConnectivityProbe;
use crate::reconcile::{ReconcileConfig, ReconcileReport, ReconciliationEngine};
use crate::runtime::ContainerRuntime;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info};

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between cycles (default: 20 seconds)
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
        }
    }
}

/// Result of one probe and reconcile cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle: u64,
    pub verdict: ProbeResult,
    /// `None` when the container listing could not be read
    pub report: Option<ReconcileReport>,
}

/// Drives the probe and reconciliation engine on a fixed interval
pub struct Scheduler {
    probe: Arc<dyn ConnectivityProbe>,
    engine: ReconciliationEngine,
    endpoint: ControlPlaneEndpoint,
    config: SchedulerConfig,
    health: HealthRegistry,
    metrics: SentryMetrics,
    logger: SentryLogger,
    cycles: u64,
}

impl Scheduler {
    pub fn endpoint(&self) -> &ControlPlaneEndpoint {
        &self.endpoint
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Run cycles until `shutdown` fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            endpoint = %self.endpoint,
            "Starting reconciliation loop"
        );

        loop {
            self.run_cycle().await;
            self.logger.log_end(self.config.interval.as_secs());

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.recv() => {
                    info!(cycles = self.cycles, "Shutting down reconciliation loop");
                    break;
                }
            }
        }
    }

    /// Execute a single probe → classify → reconcile cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        self.logger.log_begin(self.cycles);

        let verdict = self.check_connectivity().await;

        let report = match self.engine.reconcile_current(&verdict).await {
            Ok(report) => {
                self.record_report(&report).await;
                self.health.mark_reconciled().await;
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Failed to enumerate containers, retrying next cycle");
                self.health
                    .set_unhealthy(components::RUNTIME, e.to_string())
                    .await;
                None
            }
        };

        self.metrics.inc_cycles();

        CycleOutcome {
            cycle: self.cycles,
            verdict,
            report,
        }
    }

    async fn check_connectivity(&self) -> ProbeResult {
        let start = Instant::now();
        let verdict = self.probe.probe(&self.endpoint).await;
        self.metrics
            .observe_probe_latency(start.elapsed().as_secs_f64());
        self.metrics.set_reachable(verdict.is_reachable());

        match &verdict {
            ProbeResult::Reachable => self.health.set_healthy(components::PROBE).await,
            ProbeResult::Unreachable(failure) => {
                self.health
                    .set_degraded(
                        components::PROBE,
                        format!("control plane unreachable: {}", failure),
                    )
                    .await
            }
        }

        verdict
    }

    async fn record_report(&self, report: &ReconcileReport) {
        self.health.set_healthy(components::RUNTIME).await;

        if report.is_clean() {
            self.health.set_healthy(components::RECONCILER).await;
        } else {
            self.health
                .set_degraded(
                    components::RECONCILER,
                    format!("{} container(s) failed to reconcile", report.failures),
                )
                .await;
        }

        for mutation in &report.applied {
            self.metrics.inc_mutation(mutation.operation.as_str());
        }
        self.metrics.add_mutation_failures(report.failures as u64);
        self.metrics.set_managed_containers(report.managed as i64);
    }
}

/// Builder for creating the reconciliation loop
pub struct SchedulerBuilder {
    probe: Option<Arc<dyn ConnectivityProbe>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    endpoint: Option<ControlPlaneEndpoint>,
    config: SchedulerConfig,
    reconcile: ReconcileConfig,
    health: Option<HealthRegistry>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            probe: None,
            runtime: None,
            endpoint: None,
            config: SchedulerConfig::default(),
            reconcile: ReconcileConfig::default(),
            health: None,
        }
    }

    pub fn probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn endpoint(mut self, endpoint: ControlPlaneEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the MaximumRetryCount applied while ECS is unreachable
    pub fn retries(mut self, retries: u32) -> Self {
        self.reconcile.retries = retries;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let probe = self
            .probe
            .ok_or_else(|| anyhow::anyhow!("Probe is required"))?;
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        let endpoint = self
            .endpoint
            .ok_or_else(|| anyhow::anyhow!("Control-plane endpoint is required"))?;

        let logger = SentryLogger::new(&endpoint.region);
        let engine = ReconciliationEngine::new(runtime, self.reconcile, logger.clone());

        Ok(Scheduler {
            probe,
            engine,
            endpoint,
            config: self.config,
            health: self.health.unwrap_or_default(),
            metrics: SentryMetrics::new(),
            logger,
            cycles: 0,
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
