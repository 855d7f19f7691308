//! Observability infrastructure for the network sentry
//!
//! Provides:
//! - Prometheus metrics (cycles, reachability, probe latency, mutations)
//! - Phase-tagged structured logging with tracing

use crate::models::{ControlPlaneEndpoint, RestartPolicy};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Phase tags carried by every cycle log line
pub mod phase {
    pub const STARTUP: &str = "startup";
    pub const BEGIN: &str = "begin";
    pub const CONNECT: &str = "connect";
    pub const OFFLINE: &str = "ecs-offline";
    pub const ONLINE: &str = "ecs-online";
    pub const END: &str = "end";
}

/// Histogram buckets for probe latency (in seconds)
const PROBE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SentryMetricsInner> = OnceLock::new();

struct SentryMetricsInner {
    cycles: IntCounter,
    control_plane_reachable: Gauge,
    probe_latency_seconds: Histogram,
    mutations: IntCounterVec,
    mutation_failures: IntCounter,
    managed_containers: IntGauge,
}

impl SentryMetricsInner {
    fn new() -> Self {
        Self {
            cycles: register_int_counter!(
                "sentry_cycles_total",
                "Number of completed probe and reconcile cycles"
            )
            .expect("Failed to register cycles_total"),

            control_plane_reachable: register_gauge!(
                "sentry_control_plane_reachable",
                "1 when the last probe reached the ECS control plane, 0 otherwise"
            )
            .expect("Failed to register control_plane_reachable"),

            probe_latency_seconds: register_histogram!(
                "sentry_probe_latency_seconds",
                "Time spent probing the ECS control plane",
                PROBE_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_latency_seconds"),

            mutations: register_int_counter_vec!(
                "sentry_mutations_total",
                "Container mutations applied, by operation",
                &["operation"]
            )
            .expect("Failed to register mutations_total"),

            mutation_failures: register_int_counter!(
                "sentry_mutation_failures_total",
                "Container mutations that failed"
            )
            .expect("Failed to register mutation_failures_total"),

            managed_containers: register_int_gauge!(
                "sentry_managed_containers",
                "ECS-managed containers seen in the last cycle"
            )
            .expect("Failed to register managed_containers"),
        }
    }
}

/// Sentry metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct SentryMetrics {
    _private: (),
}

impl Default for SentryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SentryMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SentryMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SentryMetricsInner {
        GLOBAL_METRICS.get_or_init(SentryMetricsInner::new)
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles.inc();
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner()
            .control_plane_reachable
            .set(if reachable { 1.0 } else { 0.0 });
    }

    pub fn observe_probe_latency(&self, duration_secs: f64) {
        self.inner().probe_latency_seconds.observe(duration_secs);
    }

    pub fn inc_mutation(&self, operation: &str) {
        self.inner()
            .mutations
            .with_label_values(&[operation])
            .inc();
    }

    pub fn add_mutation_failures(&self, count: u64) {
        self.inner().mutation_failures.inc_by(count);
    }

    pub fn set_managed_containers(&self, count: i64) {
        self.inner().managed_containers.set(count);
    }
}

/// Effective settings reported at startup
#[derive(Debug, Clone)]
pub struct StartupSettings<'a> {
    pub endpoint: &'a ControlPlaneEndpoint,
    pub interval_secs: u64,
    pub retries: u32,
    pub log_file: Option<&'a str>,
    pub log_level: &'a str,
}

/// Structured logger for sentry events
///
/// Every line carries the cycle phase, so the log can be audited the same
/// way regardless of destination.
#[derive(Clone)]
pub struct SentryLogger {
    region: String,
}

impl SentryLogger {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn log_startup(&self, version: &str, settings: &StartupSettings<'_>) {
        info!(
            phase = phase::STARTUP,
            version = %version,
            "ecs-network-sentry starting"
        );
        info!(phase = phase::STARTUP, region = %self.region, endpoint = %settings.endpoint, "arg - aws region");
        info!(phase = phase::STARTUP, interval_secs = settings.interval_secs, "arg - interval");
        info!(phase = phase::STARTUP, retries = settings.retries, "arg - retries");
        info!(
            phase = phase::STARTUP,
            log_file = settings.log_file.unwrap_or("stdout"),
            "arg - logfile"
        );
        info!(phase = phase::STARTUP, log_level = %settings.log_level, "arg - loglevel");
    }

    pub fn log_begin(&self, cycle: u64) {
        info!(phase = phase::BEGIN, cycle = cycle, "Connectivity test");
    }

    pub fn log_offline(&self) {
        info!(
            phase = phase::OFFLINE,
            region = %self.region,
            "ECS unreachable, configuring container restart policy"
        );
    }

    pub fn log_online(&self) {
        info!(phase = phase::ONLINE, region = %self.region, "ECS is reachable");
    }

    pub fn log_agent_paused(&self, container_id: &str) {
        info!(phase = phase::OFFLINE, container_id = %container_id, "ECS agent paused");
    }

    pub fn log_agent_unpaused(&self, container_id: &str) {
        info!(phase = phase::ONLINE, container_id = %container_id, "ECS agent unpaused");
    }

    /// Log a restart policy after it was applied and read back
    pub fn log_policy_applied(
        &self,
        phase: &str,
        container: &str,
        cluster: &str,
        policy: &RestartPolicy,
    ) {
        info!(
            phase = %phase,
            container = %container,
            cluster = %cluster,
            policy = %policy,
            "Set container restart policy"
        );
    }

    pub fn log_container_retired(&self, container: &str, cluster: &str, restart_count: u64) {
        info!(
            phase = phase::ONLINE,
            container = %container,
            cluster = %cluster,
            restart_count = restart_count,
            "Container was restarted by docker, stopped and removed"
        );
    }

    pub fn log_skipped(&self, phase: &str, container: &str, reason: &str) {
        debug!(phase = %phase, container = %container, reason = %reason, "No change needed");
    }

    pub fn log_mutation_failed(&self, phase: &str, container: &str, error: &dyn std::fmt::Display) {
        warn!(
            phase = %phase,
            container = %container,
            error = %error,
            "Container mutation failed, continuing with remaining containers"
        );
    }

    pub fn log_end(&self, interval_secs: u64) {
        info!(phase = phase::END, interval_secs = interval_secs, "Sleeping until next cycle");
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(phase = phase::END, reason = %reason, "ecs-network-sentry shutting down");
    }
}
