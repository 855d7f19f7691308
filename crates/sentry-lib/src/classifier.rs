//! Container classification
//!
//! Splits a container listing into the ECS agent, ECS-managed workloads
//! (those carrying the cluster label) and everything else. Nothing is
//! remembered between calls; the split is derived from names and labels.

use crate::models::ManagedContainer;

/// Container listing partitioned by role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedContainers {
    /// The ECS agent container, when running
    pub agent: Option<ManagedContainer>,
    /// Containers launched by ECS on this node
    pub managed: Vec<ManagedContainer>,
    /// Containers the sentry leaves alone
    pub other: Vec<ManagedContainer>,
}

impl ClassifiedContainers {
    pub fn is_empty(&self) -> bool {
        self.agent.is_none() && self.managed.is_empty() && self.other.is_empty()
    }
}

/// Partition `containers`, preserving enumeration order within each group
pub fn classify(containers: Vec<ManagedContainer>) -> ClassifiedContainers {
    let mut classified = ClassifiedContainers::default();

    for container in containers {
        if container.is_ecs_agent() {
            // Docker names are unique; keep the first if a runtime ever repeats one
            if classified.agent.is_none() {
                classified.agent = Some(container);
            } else {
                classified.other.push(container);
            }
        } else if container.cluster().is_some() {
            classified.managed.push(container);
        } else {
            classified.other.push(container);
        }
    }

    classified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ContainerState, RestartPolicy, ECS_AGENT_NAME, ECS_CLUSTER_LABEL,
    };
    use std::collections::HashMap;

    fn container(id: &str, name: &str, cluster: Option<&str>) -> ManagedContainer {
        let mut labels = HashMap::new();
        labels.insert("maintainer".to_string(), "ops".to_string());
        if let Some(cluster) = cluster {
            labels.insert(ECS_CLUSTER_LABEL.to_string(), cluster.to_string());
        }

        ManagedContainer {
            id: id.to_string(),
            name: name.to_string(),
            labels,
            restart_policy: RestartPolicy::never(),
            state: ContainerState::Running,
            restart_count: 0,
        }
    }

    #[test]
    fn test_classify_partitions_by_role() {
        let classified = classify(vec![
            container("1", "web", Some("edge")),
            container("2", ECS_AGENT_NAME, None),
            container("3", "node-exporter", None),
            container("4", "worker", Some("edge")),
        ]);

        assert_eq!(classified.agent.as_ref().map(|c| c.id.as_str()), Some("2"));
        let managed: Vec<_> = classified.managed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(managed, vec!["1", "4"]);
        assert_eq!(classified.other.len(), 1);
        assert_eq!(classified.other[0].id, "3");
    }

    #[test]
    fn test_agent_with_cluster_label_is_not_managed() {
        let classified = classify(vec![container("1", ECS_AGENT_NAME, Some("edge"))]);

        assert!(classified.agent.is_some());
        assert!(classified.managed.is_empty());
    }

    #[test]
    fn test_name_match_is_exact() {
        let classified = classify(vec![container("1", "ecs-agent-sidecar", None)]);

        assert!(classified.agent.is_none());
        assert_eq!(classified.other.len(), 1);
    }

    #[test]
    fn test_classify_empty() {
        assert!(classify(Vec::new()).is_empty());
    }
}
