//! Reconciliation of container restart behaviour with control-plane reachability
//!
//! While ECS is unreachable the agent is paused and managed containers are
//! switched to an on-failure restart policy, so Docker keeps them running.
//! Once ECS answers again, containers Docker restarted during the outage are
//! stopped and removed (ECS recreates them) and the rest go back to the `no`
//! policy, after which the agent is unpaused.
//!
//! No state is kept between passes. Every decision reads the container's
//! live attributes first, which makes each pass idempotent.

#[cfg(test)]
mod tests;

use crate::classifier::{classify, ClassifiedContainers};
use crate::models::{ManagedContainer, ProbeResult, RestartPolicy};
use crate::observability::{phase, SentryLogger};
use crate::runtime::{ContainerRuntime, RuntimeError};
use std::sync::Arc;
use tracing::debug;

/// Settings for the reconciliation engine
#[derive(Debug, Clone, Default)]
pub struct ReconcileConfig {
    /// MaximumRetryCount applied while ECS is unreachable
    pub retries: u32,
}

/// Kind of change applied to a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PauseAgent,
    UnpauseAgent,
    /// Switch to on-failure with the configured retries
    EnableRestarts,
    /// Switch back to the `no` policy
    ResetPolicy,
    /// Stop and remove a container Docker restarted during the outage
    Retire,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::PauseAgent => "pause_agent",
            Operation::UnpauseAgent => "unpause_agent",
            Operation::EnableRestarts => "enable_restarts",
            Operation::ResetPolicy => "reset_policy",
            Operation::Retire => "retire",
        }
    }
}

/// A mutation that reached the runtime successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    pub container: String,
    pub operation: Operation,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: Vec<AppliedMutation>,
    /// Containers already in the target state
    pub skipped: usize,
    /// Containers whose read or mutation failed
    pub failures: usize,
    /// ECS-managed containers seen in this pass
    pub managed: usize,
}

impl ReconcileReport {
    pub fn mutation_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }

    fn record(&mut self, container: &ManagedContainer, operation: Operation) {
        self.applied.push(AppliedMutation {
            container: container.name.clone(),
            operation,
        });
    }
}

/// Applies the restart/pause changes a probe verdict calls for
pub struct ReconciliationEngine {
    runtime: Arc<dyn ContainerRuntime>,
    config: ReconcileConfig,
    logger: SentryLogger,
}

impl ReconciliationEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: ReconcileConfig,
        logger: SentryLogger,
    ) -> Self {
        Self {
            runtime,
            config,
            logger,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Enumerate and classify the live containers, then reconcile them
    pub async fn reconcile_current(
        &self,
        verdict: &ProbeResult,
    ) -> Result<ReconcileReport, RuntimeError> {
        let containers = self.runtime.list_containers().await?;
        let classified = classify(containers);
        Ok(self.reconcile(verdict, &classified).await)
    }

    /// Reconcile an already classified listing against `verdict`
    ///
    /// Per-container failures are logged and counted; they never stop the
    /// remaining containers from being processed.
    pub async fn reconcile(
        &self,
        verdict: &ProbeResult,
        classified: &ClassifiedContainers,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            managed: classified.managed.len(),
            ..Default::default()
        };

        match verdict {
            ProbeResult::Unreachable(_) => self.go_offline(classified, &mut report).await,
            ProbeResult::Reachable => self.go_online(classified, &mut report).await,
        }

        report
    }

    async fn go_offline(&self, classified: &ClassifiedContainers, report: &mut ReconcileReport) {
        self.logger.log_offline();

        if let Some(agent) = &classified.agent {
            self.pause_agent(agent, report).await;
        }

        for container in &classified.managed {
            self.enable_restarts(container, report).await;
        }
    }

    async fn go_online(&self, classified: &ClassifiedContainers, report: &mut ReconcileReport) {
        self.logger.log_online();

        for container in &classified.managed {
            self.restore(container, report).await;
        }

        // Workloads are settled before the agent takes over again
        if let Some(agent) = &classified.agent {
            self.unpause_agent(agent, report).await;
        }
    }

    async fn pause_agent(&self, agent: &ManagedContainer, report: &mut ReconcileReport) {
        let Some(live) = self.refresh(phase::OFFLINE, agent, report).await else {
            return;
        };

        if live.is_paused() {
            self.logger
                .log_skipped(phase::OFFLINE, &live.name, "agent already paused");
            report.skipped += 1;
            return;
        }

        match self.runtime.pause(&live.id).await {
            Ok(()) => {
                report.record(&live, Operation::PauseAgent);
                self.logger.log_agent_paused(&live.id);
            }
            Err(e) => self.fail(phase::OFFLINE, &live, &e, report),
        }
    }

    async fn unpause_agent(&self, agent: &ManagedContainer, report: &mut ReconcileReport) {
        let Some(live) = self.refresh(phase::ONLINE, agent, report).await else {
            return;
        };

        if !live.is_paused() {
            self.logger
                .log_skipped(phase::ONLINE, &live.name, "agent not paused");
            report.skipped += 1;
            return;
        }

        match self.runtime.unpause(&live.id).await {
            Ok(()) => {
                report.record(&live, Operation::UnpauseAgent);
                self.logger.log_agent_unpaused(&live.id);
            }
            Err(e) => self.fail(phase::ONLINE, &live, &e, report),
        }
    }

    async fn enable_restarts(&self, container: &ManagedContainer, report: &mut ReconcileReport) {
        let Some(live) = self.refresh(phase::OFFLINE, container, report).await else {
            return;
        };

        if live.restart_policy.is_on_failure() {
            self.logger
                .log_skipped(phase::OFFLINE, &live.name, "already on-failure");
            report.skipped += 1;
            return;
        }

        let policy = RestartPolicy::on_failure(self.config.retries);
        match self.runtime.update_restart_policy(&live.id, policy).await {
            Ok(()) => {
                report.record(&live, Operation::EnableRestarts);
                self.log_applied_policy(phase::OFFLINE, &live, policy).await;
            }
            Err(e) => self.fail(phase::OFFLINE, &live, &e, report),
        }
    }

    async fn restore(&self, container: &ManagedContainer, report: &mut ReconcileReport) {
        let Some(live) = self.refresh(phase::ONLINE, container, report).await else {
            return;
        };

        if !live.restart_policy.is_on_failure() {
            self.logger
                .log_skipped(phase::ONLINE, &live.name, "not on-failure");
            report.skipped += 1;
            return;
        }

        if live.restart_count > 0 {
            self.retire(&live, report).await;
            return;
        }

        let policy = RestartPolicy::never();
        match self.runtime.update_restart_policy(&live.id, policy).await {
            Ok(()) => {
                report.record(&live, Operation::ResetPolicy);
                self.log_applied_policy(phase::ONLINE, &live, policy).await;
            }
            Err(e) => self.fail(phase::ONLINE, &live, &e, report),
        }
    }

    /// Stop and remove a container Docker restarted while ECS was away
    async fn retire(&self, live: &ManagedContainer, report: &mut ReconcileReport) {
        if let Err(e) = self.runtime.stop(&live.id).await {
            self.fail(phase::ONLINE, live, &e, report);
            return;
        }

        if let Err(e) = self.runtime.remove(&live.id).await {
            self.fail(phase::ONLINE, live, &e, report);
            return;
        }

        report.record(live, Operation::Retire);
        self.logger.log_container_retired(
            &live.name,
            live.cluster().unwrap_or_default(),
            live.restart_count,
        );
    }

    /// Read the container's current attributes before deciding anything
    async fn refresh(
        &self,
        phase: &str,
        container: &ManagedContainer,
        report: &mut ReconcileReport,
    ) -> Option<ManagedContainer> {
        match self.runtime.reload_attributes(&container.id).await {
            Ok(live) => Some(live),
            Err(e) => {
                self.fail(phase, container, &e, report);
                None
            }
        }
    }

    /// Read the policy back so the log shows what the runtime applied
    async fn log_applied_policy(&self, phase: &str, live: &ManagedContainer, requested: RestartPolicy) {
        let cluster = live.cluster().unwrap_or_default();

        match self.runtime.reload_attributes(&live.id).await {
            Ok(reloaded) => {
                self.logger
                    .log_policy_applied(phase, &live.name, cluster, &reloaded.restart_policy)
            }
            Err(e) => {
                debug!(container = %live.name, error = %e, "Could not read back restart policy");
                self.logger
                    .log_policy_applied(phase, &live.name, cluster, &requested);
            }
        }
    }

    fn fail(
        &self,
        phase: &str,
        container: &ManagedContainer,
        error: &RuntimeError,
        report: &mut ReconcileReport,
    ) {
        self.logger.log_mutation_failed(phase, &container.name, error);
        report.failures += 1;
    }
}
