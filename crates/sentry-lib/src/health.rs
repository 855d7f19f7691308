//! Liveness and readiness state for the sentry's components
//!
//! The scheduler reports into one shared [`HealthRegistry`]; the binary's
//! HTTP server reads it back for `/healthz` and `/readyz`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    /// Control-plane reachability; degraded while ECS is unreachable
    pub const PROBE: &str = "probe";
    /// Docker daemon; unhealthy when containers cannot be listed
    pub const RUNTIME: &str = "runtime";
    /// Per-container mutations; degraded after partial failures
    pub const RECONCILER: &str = "reconciler";

    pub const ALL: [&str; 3] = [PROBE, RUNTIME, RECONCILER];
}

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but the sentry is compensating for something
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: Utc::now(),
        }
    }
}

/// Body of `/healthz`; the overall status is the worst component status
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    reconciled: bool,
}

/// Shared component health, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    /// Registry with every sentry component starting out healthy
    pub fn for_sentry() -> Self {
        let components = components::ALL
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ComponentHealth::new(ComponentStatus::Healthy, None),
                )
            })
            .collect();

        Self {
            state: Arc::new(RwLock::new(HealthState {
                components,
                reconciled: false,
            })),
        }
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Record that a cycle has reconciled the node at least once
    pub async fn mark_reconciled(&self) {
        self.state.write().await.reconciled = true;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready once a cycle has reconciled and no component has failed
    pub async fn readiness(&self) -> ReadinessResponse {
        let health = self.health().await;
        let reconciled = self.state.read().await.reconciled;

        let reason = if !reconciled {
            Some("First reconciliation cycle not yet complete")
        } else if health.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
