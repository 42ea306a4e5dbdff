//! A group of members electing over shared in-memory collaborators.

use parking_lot::Mutex;
use roleguard_core::memory::{InMemoryLeaseStore, InMemoryResourceApi};
use roleguard_core::{
    ElectionConfig, ElectionState, ElectionTimings, LeaseRef, MemberIdentity, ResourceRef,
    ROLE_LABEL_KEY,
};
use roleguard_leader::{
    CoordinatorConfig, LeaderCoordinator, LeaderResult, LeaseElector, MetricsReporter,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::{Isolation, MemberLeaseStore};

pub const NAMESPACE: &str = "default";
pub const ELECTION_GROUP: &str = "roleguard-test";

/// Poll interval used by the wait helpers.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct ClusterMember {
    coordinator: Arc<LeaderCoordinator>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<LeaderResult<()>>>>,
}

/// Members `m1..=mN`, each labelling pod `pod-mN`.
pub struct ElectionCluster {
    leases: InMemoryLeaseStore,
    resources: InMemoryResourceApi,
    isolation: Isolation,
    timings: ElectionTimings,
    coordinator_config: CoordinatorConfig,
    members: BTreeMap<String, ClusterMember>,
}

impl ElectionCluster {
    /// Starts `member_count` members.
    pub fn start(
        member_count: usize,
        timings: ElectionTimings,
        coordinator_config: CoordinatorConfig,
    ) -> LeaderResult<Self> {
        let mut cluster = Self {
            leases: InMemoryLeaseStore::new(),
            resources: InMemoryResourceApi::new(),
            isolation: Isolation::new(),
            timings,
            coordinator_config,
            members: BTreeMap::new(),
        };

        for index in 1..=member_count {
            cluster.add_member(&format!("m{index}"))?;
        }

        info!(members = member_count, "Started election cluster");
        Ok(cluster)
    }

    /// Adds a member and starts its election. A member that was stopped
    /// before is restarted under the same identity.
    pub fn add_member(&mut self, member_id: &str) -> LeaderResult<()> {
        let identity =
            MemberIdentity::new(member_id, ELECTION_GROUP, NAMESPACE, pod_name(member_id))?;
        let resource = identity.resource_ref();
        if self.resources.labels(&resource).is_none() {
            self.resources.insert(resource, None);
        }

        let election = Arc::new(ElectionConfig::new(identity, self.timings)?);
        let metrics = Arc::new(MetricsReporter::new(&election.identity)?);
        let store = MemberLeaseStore::new(self.leases.clone(), member_id, self.isolation.clone());
        let coordinator = Arc::new(
            LeaderCoordinator::new(
                election,
                Arc::new(LeaseElector::new(Arc::new(store))),
                Arc::new(self.resources.clone()),
                metrics,
            )
            .with_config(self.coordinator_config.clone()),
        );

        let shutdown = CancellationToken::new();
        let running = Arc::clone(&coordinator);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { running.run(token).await });

        self.members.insert(
            member_id.to_string(),
            ClusterMember {
                coordinator,
                shutdown,
                handle: Mutex::new(Some(handle)),
            },
        );
        Ok(())
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn state(&self, member_id: &str) -> Option<ElectionState> {
        self.members
            .get(member_id)
            .map(|member| member.coordinator.state())
    }

    pub fn coordinator(&self, member_id: &str) -> Option<Arc<LeaderCoordinator>> {
        self.members
            .get(member_id)
            .map(|member| Arc::clone(&member.coordinator))
    }

    /// Running members whose state is `Leader`.
    pub fn leaders(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|(_, member)| member.handle.lock().is_some() && member.coordinator.is_leader())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn lease_holder(&self) -> Option<String> {
        self.leases.holder(&self.lease_ref())
    }

    pub fn lease_ref(&self) -> LeaseRef {
        LeaseRef::new(NAMESPACE, ELECTION_GROUP)
    }

    pub fn label(&self, member_id: &str) -> Option<String> {
        self.resources
            .label(&ResourceRef::new(NAMESPACE, pod_name(member_id)), ROLE_LABEL_KEY)
    }

    /// Members whose pod currently carries the leader label.
    pub fn labelled_leaders(&self) -> Vec<String> {
        self.members
            .keys()
            .filter(|id| self.label(id).as_deref() == Some("true"))
            .cloned()
            .collect()
    }

    pub fn resources(&self) -> &InMemoryResourceApi {
        &self.resources
    }

    pub fn leases(&self) -> &InMemoryLeaseStore {
        &self.leases
    }

    pub fn isolate(&self, member_id: &str) {
        warn!(member_id, "Isolating member from lease store");
        self.isolation.isolate(member_id);
    }

    pub fn heal(&self, member_id: &str) {
        info!(member_id, "Healing member");
        self.isolation.heal(member_id);
    }

    pub fn heal_all(&self) {
        self.isolation.heal_all();
    }

    /// Cancels a member and waits for its shutdown demotion.
    pub async fn stop(&self, member_id: &str) -> Option<LeaderResult<()>> {
        let member = self.members.get(member_id)?;
        member.shutdown.cancel();
        let handle = member.handle.lock().take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(member_id, error = %e, "Member task failed");
                None
            }
        }
    }

    /// Aborts a member without releasing its lease or touching its label.
    pub fn crash(&self, member_id: &str) {
        if let Some(member) = self.members.get(member_id) {
            if let Some(handle) = member.handle.lock().take() {
                warn!(member_id, "Crashing member");
                handle.abort();
                // Stops the orphaned leader loop.
                member.shutdown.cancel();
            }
        }
    }

    /// Waits until exactly one running member leads and holds the lease.
    pub async fn wait_for_single_leader(&self, limit: Duration) -> Option<String> {
        let deadline = Instant::now() + limit;
        loop {
            let leaders = self.leaders();
            if let [leader] = leaders.as_slice() {
                if self.lease_holder().as_deref() == Some(leader.as_str()) {
                    return Some(leader.clone());
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until a running member other than `previous` leads.
    pub async fn wait_for_new_leader(&self, previous: &str, limit: Duration) -> Option<String> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(leader) = self.wait_for_single_leader(POLL_INTERVAL).await {
                if leader != previous {
                    return Some(leader);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Stops every running member.
    pub async fn shutdown(&self) {
        for member_id in self.member_ids() {
            if let Some(Err(e)) = self.stop(&member_id).await {
                warn!(member_id, error = %e, "Member stopped with error");
            }
        }
    }
}

pub fn pod_name(member_id: &str) -> String {
    format!("pod-{member_id}")
}
