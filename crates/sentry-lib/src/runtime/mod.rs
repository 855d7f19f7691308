//! Container runtime access
//!
//! The reconciler only ever talks to the runtime through [`ContainerRuntime`],
//! which mirrors the handful of Docker operations the sentry needs. Each
//! mutation is a single runtime call; nothing is cached between calls.

mod docker;
mod memory;

pub use docker::DockerRuntime;
pub use memory::{InMemoryRuntime, RuntimeCall};

use crate::models::{ManagedContainer, RestartPolicy};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a container runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Enumerating or inspecting containers failed
    #[error("runtime query failed: {message}")]
    Query { message: String },

    /// A state-changing call was rejected
    #[error("{operation} failed for container {container}: {message}")]
    Mutation {
        operation: &'static str,
        container: String,
        message: String,
    },

    /// The container disappeared between enumeration and use
    #[error("container {container} not found")]
    NotFound { container: String },
}

impl RuntimeError {
    pub fn query(message: impl Into<String>) -> Self {
        RuntimeError::Query {
            message: message.into(),
        }
    }

    pub fn mutation(
        operation: &'static str,
        container: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        RuntimeError::Mutation {
            operation,
            container: container.into(),
            message: message.into(),
        }
    }
}

/// Operations the sentry needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List running (and paused) containers with their current attributes
    async fn list_containers(&self) -> Result<Vec<ManagedContainer>, RuntimeError>;

    /// Re-read the live attributes of one container
    async fn reload_attributes(&self, id: &str) -> Result<ManagedContainer, RuntimeError>;

    async fn pause(&self, id: &str) -> Result<(), RuntimeError>;

    async fn unpause(&self, id: &str) -> Result<(), RuntimeError>;

    async fn update_restart_policy(
        &self,
        id: &str,
        policy: RestartPolicy,
    ) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}
