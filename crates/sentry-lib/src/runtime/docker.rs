//! Docker engine implementation of [`ContainerRuntime`]

use super::{ContainerRuntime, RuntimeError};
use crate::models::{ContainerState, ManagedContainer, RestartMode, RestartPolicy};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions, UpdateContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use tracing::{debug, info, warn};

/// Container runtime backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket and
    /// verify the daemon answers
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::query(format!("failed to create docker client: {}", e)))?;

        let runtime = Self::with_client(docker);
        runtime.ping().await?;
        Ok(runtime)
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check the daemon is reachable
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        let version = self
            .docker
            .ping()
            .await
            .map_err(|e| RuntimeError::query(format!("docker daemon unreachable: {}", e)))?;
        info!(response = %version, "Connected to docker daemon");
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ManagedContainer, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if not_found(&e) {
                    RuntimeError::NotFound {
                        container: id.to_string(),
                    }
                } else {
                    RuntimeError::query(format!("inspect {}: {}", id, e))
                }
            })?;

        container_from_inspect(response)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ManagedContainer>, RuntimeError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::query(format!("list containers: {}", e)))?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else {
                continue;
            };

            match self.inspect(&id).await {
                Ok(container) => containers.push(container),
                Err(RuntimeError::NotFound { .. }) => {
                    debug!(container_id = %id, "Container exited during enumeration");
                }
                Err(e) => {
                    warn!(container_id = %id, error = %e, "Skipping container that could not be inspected");
                }
            }
        }

        Ok(containers)
    }

    async fn reload_attributes(&self, id: &str) -> Result<ManagedContainer, RuntimeError> {
        self.inspect(id).await
    }

    async fn pause(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .pause_container(id)
            .await
            .map_err(|e| mutation_error("pause", id, e))
    }

    async fn unpause(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .unpause_container(id)
            .await
            .map_err(|e| mutation_error("unpause", id, e))
    }

    async fn update_restart_policy(
        &self,
        id: &str,
        policy: RestartPolicy,
    ) -> Result<(), RuntimeError> {
        let options = UpdateContainerOptions::<String> {
            restart_policy: Some(docker_restart_policy(policy)),
            ..Default::default()
        };

        self.docker
            .update_container(id, options)
            .await
            .map_err(|e| mutation_error("update_restart_policy", id, e))
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(|e| mutation_error("stop", id, e))
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| mutation_error("remove", id, e))
    }
}

fn not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn mutation_error(operation: &'static str, id: &str, error: BollardError) -> RuntimeError {
    if not_found(&error) {
        RuntimeError::NotFound {
            container: id.to_string(),
        }
    } else {
        RuntimeError::mutation(operation, id, error.to_string())
    }
}

fn docker_restart_policy(policy: RestartPolicy) -> DockerRestartPolicy {
    let (name, maximum_retry_count) = match policy.mode {
        RestartMode::Never => (RestartPolicyNameEnum::NO, None),
        RestartMode::OnFailure => (
            RestartPolicyNameEnum::ON_FAILURE,
            Some(i64::from(policy.max_retries)),
        ),
        RestartMode::Always => (RestartPolicyNameEnum::ALWAYS, None),
        RestartMode::UnlessStopped => (RestartPolicyNameEnum::UNLESS_STOPPED, None),
    };

    DockerRestartPolicy {
        name: Some(name),
        maximum_retry_count,
    }
}

fn restart_policy_from_docker(policy: Option<DockerRestartPolicy>) -> RestartPolicy {
    let Some(policy) = policy else {
        return RestartPolicy::never();
    };

    let mode = match policy.name {
        Some(RestartPolicyNameEnum::ON_FAILURE) => RestartMode::OnFailure,
        Some(RestartPolicyNameEnum::ALWAYS) => RestartMode::Always,
        Some(RestartPolicyNameEnum::UNLESS_STOPPED) => RestartMode::UnlessStopped,
        _ => RestartMode::Never,
    };
    let retries = policy
        .maximum_retry_count
        .unwrap_or(0)
        .clamp(0, i64::from(u32::MAX)) as u32;

    RestartPolicy::with_mode(mode, retries)
}

/// Build a snapshot from `docker inspect` output
fn container_from_inspect(
    response: ContainerInspectResponse,
) -> Result<ManagedContainer, RuntimeError> {
    let id = response
        .id
        .ok_or_else(|| RuntimeError::query("inspect response without container id"))?;

    // Docker reports names with a leading slash
    let name = response
        .name
        .as_deref()
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();

    let labels = response
        .config
        .and_then(|config| config.labels)
        .unwrap_or_default();

    let restart_policy =
        restart_policy_from_docker(response.host_config.and_then(|host| host.restart_policy));

    let state = match response.state.and_then(|state| state.status) {
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        _ => ContainerState::Other,
    };

    let restart_count = response.restart_count.unwrap_or(0).max(0) as u64;

    Ok(ManagedContainer {
        id,
        name,
        labels,
        restart_policy,
        state,
        restart_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ECS_CLUSTER_LABEL;
    use bollard::models::{ContainerConfig, ContainerState as DockerState, HostConfig};
    use std::collections::HashMap;

    fn inspect_response() -> ContainerInspectResponse {
        ContainerInspectResponse {
            id: Some("abc123".to_string()),
            name: Some("/ecs-web-1".to_string()),
            restart_count: Some(2),
            config: Some(ContainerConfig {
                labels: Some(HashMap::from([(
                    ECS_CLUSTER_LABEL.to_string(),
                    "edge".to_string(),
                )])),
                ..Default::default()
            }),
            host_config: Some(HostConfig {
                restart_policy: Some(DockerRestartPolicy {
                    name: Some(RestartPolicyNameEnum::ON_FAILURE),
                    maximum_retry_count: Some(5),
                }),
                ..Default::default()
            }),
            state: Some(DockerState {
                status: Some(ContainerStateStatusEnum::PAUSED),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_container_from_inspect() {
        let container = container_from_inspect(inspect_response()).unwrap();

        assert_eq!(container.id, "abc123");
        assert_eq!(container.name, "ecs-web-1");
        assert_eq!(container.cluster(), Some("edge"));
        assert_eq!(container.restart_policy, RestartPolicy::on_failure(5));
        assert_eq!(container.state, ContainerState::Paused);
        assert_eq!(container.restart_count, 2);
    }

    #[test]
    fn test_container_from_inspect_requires_id() {
        let response = ContainerInspectResponse {
            id: None,
            ..inspect_response()
        };
        assert!(matches!(
            container_from_inspect(response),
            Err(RuntimeError::Query { .. })
        ));
    }

    #[test]
    fn test_missing_restart_policy_reads_as_never() {
        let response = ContainerInspectResponse {
            host_config: None,
            ..inspect_response()
        };
        let container = container_from_inspect(response).unwrap();
        assert_eq!(container.restart_policy, RestartPolicy::never());
    }

    #[test]
    fn test_docker_restart_policy_mapping() {
        let on_failure = docker_restart_policy(RestartPolicy::on_failure(3));
        assert_eq!(on_failure.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(on_failure.maximum_retry_count, Some(3));

        let never = docker_restart_policy(RestartPolicy::never());
        assert_eq!(never.name, Some(RestartPolicyNameEnum::NO));
        assert_eq!(never.maximum_retry_count, None);
    }

    #[test]
    fn test_not_found_maps_to_not_found() {
        let error = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert_eq!(
            mutation_error("pause", "gone", error),
            RuntimeError::NotFound {
                container: "gone".to_string()
            }
        );
    }
}
