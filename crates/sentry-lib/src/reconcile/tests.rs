//! Reconciliation engine tests
//!
//! These run the engine against the in-memory runtime and assert on the
//! exact sequence of runtime calls it makes.

use super::*;
use crate::models::{
    ContainerState, ProbeFailure, RestartMode, ECS_AGENT_NAME, ECS_CLUSTER_LABEL,
};
use crate::runtime::{InMemoryRuntime, RuntimeCall};
use std::collections::HashMap;

const RETRIES: u32 = 3;

fn agent(paused: bool) -> ManagedContainer {
    ManagedContainer {
        id: "agent-id".to_string(),
        name: ECS_AGENT_NAME.to_string(),
        labels: HashMap::new(),
        restart_policy: RestartPolicy::with_mode(RestartMode::Always, 0),
        state: if paused {
            ContainerState::Paused
        } else {
            ContainerState::Running
        },
        restart_count: 0,
    }
}

fn managed(id: &str, policy: RestartPolicy, restart_count: u64) -> ManagedContainer {
    ManagedContainer {
        id: id.to_string(),
        name: format!("ecs-task-{}", id),
        labels: HashMap::from([(ECS_CLUSTER_LABEL.to_string(), "edge-cluster".to_string())]),
        restart_policy: policy,
        state: ContainerState::Running,
        restart_count,
    }
}

fn unmanaged(id: &str, policy: RestartPolicy, restart_count: u64) -> ManagedContainer {
    ManagedContainer {
        id: id.to_string(),
        name: format!("local-{}", id),
        labels: HashMap::from([("team".to_string(), "infra".to_string())]),
        restart_policy: policy,
        state: ContainerState::Running,
        restart_count,
    }
}

fn unreachable() -> ProbeResult {
    ProbeResult::Unreachable(ProbeFailure::Socket("connection refused".to_string()))
}

fn setup(containers: Vec<ManagedContainer>) -> (Arc<InMemoryRuntime>, ReconciliationEngine) {
    let runtime = Arc::new(InMemoryRuntime::new(containers));
    let engine = ReconciliationEngine::new(
        runtime.clone(),
        ReconcileConfig { retries: RETRIES },
        SentryLogger::new("test-region"),
    );
    (runtime, engine)
}

mod offline_tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_pauses_agent_and_enables_restarts_once() {
        let (runtime, engine) = setup(vec![
            agent(false),
            managed("web", RestartPolicy::never(), 0),
        ]);

        let report = engine.reconcile_current(&unreachable()).await.unwrap();

        assert_eq!(
            runtime.mutations().await,
            vec![
                RuntimeCall::Pause("agent-id".into()),
                RuntimeCall::UpdateRestartPolicy("web".into(), RestartPolicy::on_failure(RETRIES)),
            ]
        );
        assert_eq!(report.mutation_count(), 2);
        assert!(report.is_clean());
        assert!(runtime.container("agent-id").await.unwrap().is_paused());
    }

    #[tokio::test]
    async fn test_offline_is_idempotent() {
        let (runtime, engine) = setup(vec![
            agent(false),
            managed("web", RestartPolicy::never(), 0),
            managed("db", RestartPolicy::with_mode(RestartMode::Always, 0), 0),
        ]);

        engine.reconcile_current(&unreachable()).await.unwrap();
        runtime.clear_calls().await;

        let second = engine.reconcile_current(&unreachable()).await.unwrap();

        assert!(runtime.mutations().await.is_empty());
        assert_eq!(second.mutation_count(), 0);
        assert_eq!(second.skipped, 3);
    }

    #[tokio::test]
    async fn test_offline_skips_containers_already_on_failure() {
        let (runtime, engine) = setup(vec![
            agent(true),
            managed("web", RestartPolicy::on_failure(7), 0),
        ]);

        let report = engine.reconcile_current(&unreachable()).await.unwrap();

        assert!(runtime.mutations().await.is_empty());
        assert_eq!(report.skipped, 2);
        // An existing on-failure policy is left as it was, retries included
        assert_eq!(
            runtime.container("web").await.unwrap().restart_policy,
            RestartPolicy::on_failure(7)
        );
    }

    #[tokio::test]
    async fn test_offline_without_agent_still_updates_workloads() {
        let (runtime, engine) = setup(vec![managed("web", RestartPolicy::never(), 0)]);

        engine.reconcile_current(&unreachable()).await.unwrap();

        assert_eq!(
            runtime.mutations().await,
            vec![RuntimeCall::UpdateRestartPolicy(
                "web".into(),
                RestartPolicy::on_failure(RETRIES)
            )]
        );
    }

    #[tokio::test]
    async fn test_every_failure_reason_takes_offline_path() {
        let failures = [
            ProbeFailure::Socket("refused".into()),
            ProbeFailure::NameResolution("bad name".into()),
            ProbeFailure::SecureChannel("handshake".into()),
            ProbeFailure::Transfer("reset".into()),
        ];

        for failure in failures {
            let (runtime, engine) = setup(vec![agent(false)]);
            engine
                .reconcile_current(&ProbeResult::Unreachable(failure))
                .await
                .unwrap();
            assert_eq!(
                runtime.mutations().await,
                vec![RuntimeCall::Pause("agent-id".into())]
            );
        }
    }
}

mod online_tests {
    use super::*;

    #[tokio::test]
    async fn test_online_retires_restarted_container() {
        let (runtime, engine) = setup(vec![managed(
            "web",
            RestartPolicy::on_failure(RETRIES),
            3,
        )]);

        let report = engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();

        assert_eq!(
            runtime.mutations().await,
            vec![
                RuntimeCall::Stop("web".into()),
                RuntimeCall::Remove("web".into()),
            ]
        );
        assert_eq!(report.applied[0].operation, Operation::Retire);
        assert!(runtime.container("web").await.is_none());
    }

    #[tokio::test]
    async fn test_online_resets_untouched_container() {
        let (runtime, engine) = setup(vec![managed(
            "web",
            RestartPolicy::on_failure(RETRIES),
            0,
        )]);

        engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();

        assert_eq!(
            runtime.mutations().await,
            vec![RuntimeCall::UpdateRestartPolicy(
                "web".into(),
                RestartPolicy::never()
            )]
        );
        assert_eq!(
            runtime.container("web").await.unwrap().restart_policy,
            RestartPolicy::never()
        );
    }

    #[tokio::test]
    async fn test_online_unpauses_agent_after_workloads() {
        // Agent enumerated first; it must still be handled last
        let (runtime, engine) = setup(vec![
            agent(true),
            managed("web", RestartPolicy::on_failure(RETRIES), 0),
            managed("api", RestartPolicy::on_failure(RETRIES), 2),
        ]);

        engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();

        let mutations = runtime.mutations().await;
        assert_eq!(mutations.len(), 4);
        assert_eq!(
            mutations.last(),
            Some(&RuntimeCall::Unpause("agent-id".into()))
        );
        assert!(!runtime.container("agent-id").await.unwrap().is_paused());
    }

    #[tokio::test]
    async fn test_online_leaves_other_policies_alone() {
        let (runtime, engine) = setup(vec![
            agent(false),
            managed("web", RestartPolicy::never(), 0),
            managed("db", RestartPolicy::with_mode(RestartMode::UnlessStopped, 0), 5),
        ]);

        let report = engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();

        assert!(runtime.mutations().await.is_empty());
        assert_eq!(report.skipped, 3);
    }

    #[tokio::test]
    async fn test_online_is_idempotent() {
        let (runtime, engine) = setup(vec![
            agent(true),
            managed("web", RestartPolicy::on_failure(RETRIES), 0),
            managed("api", RestartPolicy::on_failure(RETRIES), 1),
        ]);

        engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();
        runtime.clear_calls().await;

        let second = engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();

        assert!(runtime.mutations().await.is_empty());
        assert_eq!(second.mutation_count(), 0);
        assert_eq!(second.managed, 1);
    }
}

mod isolation_tests {
    use super::*;

    #[tokio::test]
    async fn test_unmanaged_containers_never_mutated() {
        let containers = vec![
            unmanaged("a", RestartPolicy::never(), 0),
            unmanaged("b", RestartPolicy::on_failure(2), 4),
            ManagedContainer {
                state: ContainerState::Paused,
                ..unmanaged("c", RestartPolicy::on_failure(1), 0)
            },
        ];

        for verdict in [unreachable(), ProbeResult::Reachable] {
            let (runtime, engine) = setup(containers.clone());
            engine.reconcile_current(&verdict).await.unwrap();

            let touched: Vec<_> = runtime
                .calls()
                .await
                .into_iter()
                .filter(|call| call.container().is_some())
                .collect();
            assert!(touched.is_empty(), "unexpected calls: {:?}", touched);
        }
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_stop_later_containers() {
        let (runtime, engine) = setup(vec![
            managed("a", RestartPolicy::never(), 0),
            managed("b", RestartPolicy::never(), 0),
        ]);
        runtime.fail_mutations_for("a").await;

        let report = engine.reconcile_current(&unreachable()).await.unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(
            runtime.container("b").await.unwrap().restart_policy,
            RestartPolicy::on_failure(RETRIES)
        );
        assert!(runtime
            .mutations()
            .await
            .contains(&RuntimeCall::UpdateRestartPolicy(
                "b".into(),
                RestartPolicy::on_failure(RETRIES)
            )));
    }

    #[tokio::test]
    async fn test_failed_stop_skips_remove() {
        let (runtime, engine) = setup(vec![
            managed("a", RestartPolicy::on_failure(RETRIES), 2),
            managed("b", RestartPolicy::on_failure(RETRIES), 0),
        ]);
        runtime.fail_mutations_for("a").await;

        let report = engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();

        let mutations = runtime.mutations().await;
        assert!(mutations.contains(&RuntimeCall::Stop("a".into())));
        assert!(!mutations.contains(&RuntimeCall::Remove("a".into())));
        assert!(mutations.contains(&RuntimeCall::UpdateRestartPolicy(
            "b".into(),
            RestartPolicy::never()
        )));
        assert_eq!(report.failures, 1);
    }

    #[tokio::test]
    async fn test_vanished_container_is_logged_and_skipped() {
        let snapshot = vec![
            agent(false),
            managed("gone", RestartPolicy::never(), 0),
            managed("web", RestartPolicy::never(), 0),
        ];
        let (runtime, engine) = setup(snapshot.clone());
        runtime.vanish("gone").await;

        let report = engine.reconcile(&unreachable(), &classify(snapshot)).await;

        assert_eq!(report.failures, 1);
        assert_eq!(
            runtime.mutations().await,
            vec![
                RuntimeCall::Pause("agent-id".into()),
                RuntimeCall::UpdateRestartPolicy("web".into(), RestartPolicy::on_failure(RETRIES)),
            ]
        );
    }

    #[tokio::test]
    async fn test_decisions_use_live_attributes_not_snapshot() {
        let stale = vec![agent(false), managed("web", RestartPolicy::never(), 0)];
        let (runtime, engine) = setup(vec![
            agent(true),
            managed("web", RestartPolicy::on_failure(RETRIES), 0),
        ]);

        let report = engine.reconcile(&unreachable(), &classify(stale)).await;

        assert!(runtime.mutations().await.is_empty());
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_listing_failure_is_reported() {
        let (runtime, engine) = setup(vec![agent(false)]);
        runtime.fail_listing("daemon restarting").await;

        let result = engine.reconcile_current(&unreachable()).await;

        assert!(matches!(result, Err(RuntimeError::Query { .. })));
        assert!(runtime.mutations().await.is_empty());
    }
}

mod outage_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_outage_and_recovery() {
        let (runtime, engine) = setup(vec![
            agent(false),
            managed("web", RestartPolicy::never(), 0),
            managed("worker", RestartPolicy::never(), 0),
            unmanaged("exporter", RestartPolicy::with_mode(RestartMode::Always, 0), 0),
        ]);

        engine.reconcile_current(&unreachable()).await.unwrap();

        // Docker restarts the crashing worker while ECS is away
        runtime.simulate_restart("worker").await;
        engine.reconcile_current(&unreachable()).await.unwrap();
        runtime.clear_calls().await;

        let report = engine
            .reconcile_current(&ProbeResult::Reachable)
            .await
            .unwrap();

        assert_eq!(
            runtime.mutations().await,
            vec![
                RuntimeCall::UpdateRestartPolicy("web".into(), RestartPolicy::never()),
                RuntimeCall::Stop("worker".into()),
                RuntimeCall::Remove("worker".into()),
                RuntimeCall::Unpause("agent-id".into()),
            ]
        );
        let operations: Vec<_> = report.applied.iter().map(|m| m.operation).collect();
        assert_eq!(
            operations,
            vec![
                Operation::ResetPolicy,
                Operation::Retire,
                Operation::UnpauseAgent
            ]
        );
        assert_eq!(
            runtime.container("exporter").await.unwrap().restart_policy.mode,
            RestartMode::Always
        );
    }

    #[test]
    fn test_operation_labels() {
        assert_eq!(Operation::EnableRestarts.as_str(), "enable_restarts");
        assert_eq!(Operation::Retire.as_str(), "retire");
    }
}
