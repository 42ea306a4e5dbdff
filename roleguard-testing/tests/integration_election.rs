//! Multi-member election tests over the in-memory collaborators.
//!
//! All tests run on a paused clock, so lease expiry is simulated rather
//! than waited for.

use std::time::Duration;
use tokio::time::sleep;

use roleguard_core::{ElectionState, ElectionTimings};
use roleguard_leader::CoordinatorConfig;
use roleguard_testing::{
    create_test_scenarios, ElectionCluster, ElectionTestHarness, ExpectedOutcome, FaultType,
    Target, TestScenario,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

fn start_cluster(members: usize) -> ElectionCluster {
    ElectionCluster::start(members, ElectionTimings::default(), CoordinatorConfig::default())
        .expect("cluster should start")
}

#[tokio::test(start_paused = true)]
async fn test_exactly_one_leader_among_three() {
    init_tracing();
    let cluster = start_cluster(3);

    let leader = cluster
        .wait_for_single_leader(Duration::from_secs(30))
        .await
        .expect("a leader should be elected");
    sleep(Duration::from_secs(2)).await;

    assert_eq!(cluster.leaders(), vec![leader.clone()]);
    assert_eq!(cluster.labelled_leaders(), vec![leader.clone()]);
    for member_id in cluster.member_ids() {
        if member_id != leader {
            assert_eq!(cluster.state(&member_id), Some(ElectionState::Follower));
            assert_eq!(cluster.label(&member_id).as_deref(), Some("false"));
        }
    }

    let gauge = cluster.coordinator(&leader).unwrap().metrics().value();
    assert_eq!(gauge, Some(1.0));

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_isolated_leader_steps_down_before_takeover() {
    init_tracing();
    let cluster = start_cluster(3);
    let timings = ElectionTimings::default();

    let leader = cluster
        .wait_for_single_leader(Duration::from_secs(30))
        .await
        .unwrap();
    cluster.isolate(&leader);

    sleep(timings.renew_deadline + timings.retry_period).await;
    assert_eq!(cluster.state(&leader), Some(ElectionState::Follower));
    assert_eq!(cluster.label(&leader).as_deref(), Some("false"));

    let next = cluster
        .wait_for_new_leader(&leader, Duration::from_secs(60))
        .await
        .expect("a follower should take over");
    assert_ne!(next, leader);

    cluster.heal(&leader);
    sleep(timings.retry_period * 3).await;
    assert_eq!(cluster.leaders(), vec![next.clone()]);
    assert_eq!(cluster.labelled_leaders(), vec![next]);

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_hands_over_quickly() {
    init_tracing();
    let cluster = start_cluster(2);

    let leader = cluster
        .wait_for_single_leader(Duration::from_secs(30))
        .await
        .unwrap();
    let result = cluster.stop(&leader).await.expect("leader was running");
    assert!(result.is_ok());

    assert_eq!(cluster.label(&leader).as_deref(), Some("false"));
    assert_eq!(
        cluster.coordinator(&leader).unwrap().metrics().value(),
        Some(0.0)
    );

    // A released lease is taken over without waiting for expiry.
    let next = cluster
        .wait_for_new_leader(&leader, Duration::from_secs(12))
        .await
        .expect("released lease should be acquired");
    assert_eq!(cluster.lease_holder().as_deref(), Some(next.as_str()));

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restarted_member_rejoins_as_follower() {
    init_tracing();
    let mut cluster = start_cluster(3);

    let leader = cluster
        .wait_for_single_leader(Duration::from_secs(30))
        .await
        .unwrap();
    let follower = cluster
        .member_ids()
        .into_iter()
        .find(|id| *id != leader)
        .unwrap();

    cluster.stop(&follower).await.unwrap().unwrap();
    cluster.add_member(&follower).unwrap();
    sleep(Duration::from_secs(15)).await;

    assert_eq!(cluster.state(&follower), Some(ElectionState::Follower));
    assert_eq!(cluster.leaders(), vec![leader]);

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_predefined_scenarios() {
    init_tracing();
    let harness = ElectionTestHarness::default();

    for scenario in create_test_scenarios() {
        let name = scenario.name.clone();
        let crashes = scenario
            .faults
            .iter()
            .any(|(_, fault)| matches!(fault, FaultType::MemberCrash { .. }));

        let result = harness.run_scenario(scenario).await.unwrap();
        assert!(
            result.success,
            "{name} failed: {:?}",
            result.error_message
        );

        // A crashed leader never clears its own label.
        if !crashes {
            let final_leader = result.final_leader.clone().unwrap();
            assert_eq!(result.labelled_leaders, vec![final_leader], "{name}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_isolating_a_follower_keeps_leader() {
    init_tracing();
    let harness = ElectionTestHarness::new(
        ElectionTimings::default(),
        CoordinatorConfig::default().with_reconcile_interval(Duration::from_millis(500)),
    );

    let scenario = TestScenario {
        name: "Follower Isolation".to_string(),
        description: "An isolated follower does not disturb the leader".to_string(),
        member_count: 3,
        faults: vec![(
            Duration::from_secs(1),
            FaultType::LeaseIsolation {
                target: Target::Member("m3".to_string()),
                duration: Duration::from_secs(20),
            },
        )],
        expected_outcome: ExpectedOutcome::SameLeader,
        timeout: Duration::from_secs(30),
    };

    let result = harness.run_scenario(scenario).await.unwrap();
    // m3 may have been the leader, in which case it steps down instead.
    if result.initial_leader.as_deref() != Some("m3") {
        assert!(result.success, "{:?}", result.error_message);
    }
}
