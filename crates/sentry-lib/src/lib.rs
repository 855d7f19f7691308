//! Network sentry library for ECS Anywhere hosts
//!
//! This crate provides the core functionality for:
//! - Probing the regional ECS control plane over TLS
//! - Classifying the node's containers by ECS role
//! - Reconciling Docker restart policies and agent pause state with reachability
//! - Running the probe/reconcile cycle on a fixed interval
//! - Health checks and observability

pub mod classifier;
pub mod health;
pub mod models;
pub mod observability;
pub mod probe;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;

pub use classifier::{classify, ClassifiedContainers};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SentryLogger, SentryMetrics, StartupSettings};
pub use probe::{ConnectivityProbe, ProbeConfig, TlsProbe};
pub use reconcile::{ReconcileConfig, ReconcileReport, ReconciliationEngine};
pub use runtime::{ContainerRuntime, DockerRuntime, InMemoryRuntime, RuntimeError};
pub use scheduler::{CycleOutcome, Scheduler, SchedulerBuilder, SchedulerConfig};
