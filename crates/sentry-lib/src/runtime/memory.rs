//! In-memory container runtime
//!
//! Holds a container table and records every call made against it, so
//! reconciliation can be exercised without a Docker daemon.

use super::{ContainerRuntime, RuntimeError};
use crate::models::{ContainerState, ManagedContainer, RestartPolicy};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// One call made against an [`InMemoryRuntime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    List,
    Reload(String),
    Pause(String),
    Unpause(String),
    UpdateRestartPolicy(String, RestartPolicy),
    Stop(String),
    Remove(String),
}

impl RuntimeCall {
    /// Whether the call changes container state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, RuntimeCall::List | RuntimeCall::Reload(_))
    }

    /// Container the call targeted, if any
    pub fn container(&self) -> Option<&str> {
        match self {
            RuntimeCall::List => None,
            RuntimeCall::Reload(id)
            | RuntimeCall::Pause(id)
            | RuntimeCall::Unpause(id)
            | RuntimeCall::UpdateRestartPolicy(id, _)
            | RuntimeCall::Stop(id)
            | RuntimeCall::Remove(id) => Some(id),
        }
    }
}

/// Container runtime kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    containers: Mutex<Vec<ManagedContainer>>,
    calls: Mutex<Vec<RuntimeCall>>,
    failing: Mutex<HashSet<String>>,
    list_error: Mutex<Option<String>>,
}

impl InMemoryRuntime {
    pub fn new(containers: Vec<ManagedContainer>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Default::default()
        }
    }

    /// Make every mutation against `id` fail
    pub async fn fail_mutations_for(&self, id: impl Into<String>) {
        self.failing.lock().await.insert(id.into());
    }

    /// Make enumeration fail with `message`
    pub async fn fail_listing(&self, message: impl Into<String>) {
        *self.list_error.lock().await = Some(message.into());
    }

    pub async fn restore_listing(&self) {
        *self.list_error.lock().await = None;
    }

    /// Drop a container without recording a call, as if it exited
    pub async fn vanish(&self, id: &str) {
        self.containers.lock().await.retain(|c| c.id != id);
    }

    /// Bump the restart count, as Docker does when it restarts a container
    pub async fn simulate_restart(&self, id: &str) {
        if let Some(container) = self.containers.lock().await.iter_mut().find(|c| c.id == id) {
            container.restart_count += 1;
        }
    }

    pub async fn container(&self, id: &str) -> Option<ManagedContainer> {
        self.containers
            .lock()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().await.clone()
    }

    pub async fn mutations(&self) -> Vec<RuntimeCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    async fn mutate<F>(
        &self,
        call: RuntimeCall,
        operation: &'static str,
        id: &str,
        apply: F,
    ) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut Vec<ManagedContainer>, usize),
    {
        self.calls.lock().await.push(call);

        if self.failing.lock().await.contains(id) {
            return Err(RuntimeError::mutation(operation, id, "injected failure"));
        }

        let mut containers = self.containers.lock().await;
        let index = containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound {
                container: id.to_string(),
            })?;
        apply(&mut *containers, index);
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn list_containers(&self) -> Result<Vec<ManagedContainer>, RuntimeError> {
        self.calls.lock().await.push(RuntimeCall::List);

        if let Some(message) = self.list_error.lock().await.clone() {
            return Err(RuntimeError::query(message));
        }

        // Stopped containers drop out of the default listing
        Ok(self
            .containers
            .lock()
            .await
            .iter()
            .filter(|c| c.state != ContainerState::Other)
            .cloned()
            .collect())
    }

    async fn reload_attributes(&self, id: &str) -> Result<ManagedContainer, RuntimeError> {
        self.calls
            .lock()
            .await
            .push(RuntimeCall::Reload(id.to_string()));

        self.container(id).await.ok_or_else(|| RuntimeError::NotFound {
            container: id.to_string(),
        })
    }

    async fn pause(&self, id: &str) -> Result<(), RuntimeError> {
        self.mutate(RuntimeCall::Pause(id.to_string()), "pause", id, |c, i| {
            c[i].state = ContainerState::Paused;
        })
        .await
    }

    async fn unpause(&self, id: &str) -> Result<(), RuntimeError> {
        self.mutate(RuntimeCall::Unpause(id.to_string()), "unpause", id, |c, i| {
            c[i].state = ContainerState::Running;
        })
        .await
    }

    async fn update_restart_policy(
        &self,
        id: &str,
        policy: RestartPolicy,
    ) -> Result<(), RuntimeError> {
        self.mutate(
            RuntimeCall::UpdateRestartPolicy(id.to_string(), policy),
            "update_restart_policy",
            id,
            |c, i| {
                c[i].restart_policy = policy;
            },
        )
        .await
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.mutate(RuntimeCall::Stop(id.to_string()), "stop", id, |c, i| {
            c[i].state = ContainerState::Other;
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.mutate(RuntimeCall::Remove(id.to_string()), "remove", id, |c, i| {
            c.remove(i);
        })
        .await
    }
}
