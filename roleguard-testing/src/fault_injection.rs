use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use roleguard_core::{ElectionTimings, ResourceRef, ROLE_LABEL_KEY};
use roleguard_leader::{CoordinatorConfig, LeaderResult};

use crate::cluster::{pod_name, ElectionCluster, NAMESPACE};

/// Member selector for faults; `Leader` resolves to whoever leads when the
/// fault fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Leader,
    Member(String),
}

#[derive(Debug, Clone)]
pub enum FaultType {
    /// Cut a member off from the lease store for a while
    LeaseIsolation { target: Target, duration: Duration },
    /// Abort a member without releasing its lease
    MemberCrash { target: Target },
    /// Cancel a member the way SIGTERM would
    GracefulStop { target: Target },
    /// Overwrite a member's role label from outside
    LabelTamper { target: Target, value: String },
    /// Make the next label writes fail with a conflict
    LabelConflicts { count: u32 },
}

#[derive(Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    pub member_count: usize,
    /// (when to inject, fault type), offsets from the first stable leader
    pub faults: Vec<(Duration, FaultType)>,
    pub expected_outcome: ExpectedOutcome,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedOutcome {
    /// The first leader is still leading at the end
    SameLeader,
    /// A different member leads at the end
    LeaderChanged,
    /// Nobody leads at the end
    NoLeader,
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub scenario_name: String,
    pub success: bool,
    pub initial_leader: Option<String>,
    pub final_leader: Option<String>,
    /// Members whose pod carried the leader label at the end
    pub labelled_leaders: Vec<String>,
    pub elapsed: Duration,
    pub error_message: Option<String>,
}

/// Runs [`TestScenario`]s against a fresh [`ElectionCluster`] each.
pub struct ElectionTestHarness {
    timings: ElectionTimings,
    coordinator_config: CoordinatorConfig,
}

impl Default for ElectionTestHarness {
    fn default() -> Self {
        Self::new(ElectionTimings::default(), CoordinatorConfig::default())
    }
}

impl ElectionTestHarness {
    pub fn new(timings: ElectionTimings, coordinator_config: CoordinatorConfig) -> Self {
        Self {
            timings,
            coordinator_config,
        }
    }

    /// Time a member may need to notice a dead leader and take over.
    pub fn failover_bound(&self) -> Duration {
        self.timings.lease_duration + self.timings.retry_period * 3
    }

    pub async fn run_scenario(&self, scenario: TestScenario) -> LeaderResult<TestResult> {
        info!(scenario = %scenario.name, "Running scenario: {}", scenario.description);
        let started = Instant::now();

        let cluster = ElectionCluster::start(
            scenario.member_count,
            self.timings,
            self.coordinator_config.clone(),
        )?;

        let Some(initial_leader) = cluster.wait_for_single_leader(scenario.timeout).await else {
            cluster.shutdown().await;
            return Ok(TestResult {
                scenario_name: scenario.name,
                success: scenario.expected_outcome == ExpectedOutcome::NoLeader,
                initial_leader: None,
                final_leader: None,
                labelled_leaders: Vec::new(),
                elapsed: started.elapsed(),
                error_message: Some("no leader elected".to_string()),
            });
        };

        let faults_started = Instant::now();
        let mut healed_at = Vec::new();
        for (offset, fault) in &scenario.faults {
            let at = faults_started + *offset;
            if at > Instant::now() {
                sleep(at - Instant::now()).await;
            }
            if let Some(heal) = self.inject(&cluster, fault, &initial_leader).await {
                healed_at.push(heal);
            }
        }

        for (at, member_id) in healed_at {
            if at > Instant::now() {
                sleep(at - Instant::now()).await;
            }
            cluster.heal(&member_id);
        }

        let final_leader = match scenario.expected_outcome {
            ExpectedOutcome::SameLeader => cluster.wait_for_single_leader(scenario.timeout).await,
            ExpectedOutcome::LeaderChanged => {
                cluster
                    .wait_for_new_leader(&initial_leader, scenario.timeout)
                    .await
            }
            ExpectedOutcome::NoLeader => {
                sleep(self.failover_bound()).await;
                cluster.leaders().into_iter().next()
            }
        };
        // Give the leader loop a few ticks to settle the labels.
        sleep(self.coordinator_config.reconcile_interval * 3).await;
        let labelled_leaders = cluster.labelled_leaders();

        let success = match scenario.expected_outcome {
            ExpectedOutcome::SameLeader => final_leader.as_deref() == Some(initial_leader.as_str()),
            ExpectedOutcome::LeaderChanged => final_leader
                .as_deref()
                .is_some_and(|leader| leader != initial_leader),
            ExpectedOutcome::NoLeader => final_leader.is_none(),
        };
        let error_message = (!success).then(|| {
            format!(
                "expected {:?}, initial leader {initial_leader}, final leader {final_leader:?}",
                scenario.expected_outcome
            )
        });

        cluster.shutdown().await;

        Ok(TestResult {
            scenario_name: scenario.name,
            success,
            initial_leader: Some(initial_leader),
            final_leader,
            labelled_leaders,
            elapsed: started.elapsed(),
            error_message,
        })
    }

    /// Applies `fault`; returns when and whom to heal for timed faults.
    async fn inject(
        &self,
        cluster: &ElectionCluster,
        fault: &FaultType,
        initial_leader: &str,
    ) -> Option<(Instant, String)> {
        let resolve = |target: &Target| match target {
            Target::Leader => cluster
                .leaders()
                .into_iter()
                .next()
                .unwrap_or_else(|| initial_leader.to_string()),
            Target::Member(member_id) => member_id.clone(),
        };

        match fault {
            FaultType::LeaseIsolation { target, duration } => {
                let member_id = resolve(target);
                cluster.isolate(&member_id);
                Some((Instant::now() + *duration, member_id))
            }
            FaultType::MemberCrash { target } => {
                cluster.crash(&resolve(target));
                None
            }
            FaultType::GracefulStop { target } => {
                let member_id = resolve(target);
                if let Some(Err(e)) = cluster.stop(&member_id).await {
                    warn!(member_id, error = %e, "Member stopped with error");
                }
                None
            }
            FaultType::LabelTamper { target, value } => {
                let resource = ResourceRef::new(NAMESPACE, pod_name(&resolve(target)));
                cluster
                    .resources()
                    .set_label_externally(&resource, ROLE_LABEL_KEY, value);
                None
            }
            FaultType::LabelConflicts { count } => {
                cluster.resources().inject_conflicts(*count);
                None
            }
        }
    }
}

/// Scenarios covering the usual failure modes of a three member group.
pub fn create_test_scenarios() -> Vec<TestScenario> {
    vec![
        TestScenario {
            name: "Stable Leadership".to_string(),
            description: "Leader keeps the lease while nothing fails".to_string(),
            member_count: 3,
            faults: vec![],
            expected_outcome: ExpectedOutcome::SameLeader,
            timeout: Duration::from_secs(60),
        },
        TestScenario {
            name: "Leader Crash".to_string(),
            description: "Leader dies without releasing, a follower takes over after expiry"
                .to_string(),
            member_count: 3,
            faults: vec![(Duration::from_secs(1), FaultType::MemberCrash { target: Target::Leader })],
            expected_outcome: ExpectedOutcome::LeaderChanged,
            timeout: Duration::from_secs(60),
        },
        TestScenario {
            name: "Leader Isolation".to_string(),
            description: "Leader loses the lease store and steps down".to_string(),
            member_count: 3,
            faults: vec![(
                Duration::from_secs(1),
                FaultType::LeaseIsolation {
                    target: Target::Leader,
                    duration: Duration::from_secs(40),
                },
            )],
            expected_outcome: ExpectedOutcome::LeaderChanged,
            timeout: Duration::from_secs(60),
        },
        TestScenario {
            name: "Graceful Handover".to_string(),
            description: "Leader shuts down, releases the lease and hands over quickly"
                .to_string(),
            member_count: 3,
            faults: vec![(Duration::from_secs(1), FaultType::GracefulStop { target: Target::Leader })],
            expected_outcome: ExpectedOutcome::LeaderChanged,
            timeout: Duration::from_secs(30),
        },
        TestScenario {
            name: "Label Tampering".to_string(),
            description: "Leader label is reverted externally and healed".to_string(),
            member_count: 3,
            faults: vec![
                (
                    Duration::from_secs(1),
                    FaultType::LabelTamper {
                        target: Target::Leader,
                        value: "false".to_string(),
                    },
                ),
                (Duration::from_secs(1), FaultType::LabelConflicts { count: 1 }),
            ],
            expected_outcome: ExpectedOutcome::SameLeader,
            timeout: Duration::from_secs(30),
        },
    ]
}
