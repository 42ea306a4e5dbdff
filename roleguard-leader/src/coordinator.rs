//! Leader election coordinator.
//!
//! Turns lease callbacks into election state transitions, publishes each
//! transition through the role label and the leadership gauge, and keeps the
//! label healed while leading.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use roleguard_core::{
    ElectionConfig, ElectionState, LeaseCallbacks, LeaseClient, ResourceApi, ResourceRef, Role,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::{LeaderError, LeaderResult, MetricsReporter, ReconcileOutcome, RoleReconciler};

/// Tuning of the coordinator's own loops
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Interval between self-healing reconciliations while leading
    pub reconcile_interval: Duration,

    /// Upper bound for a single reconciliation
    pub reconcile_timeout: Duration,

    /// Upper bound for the demotion attempted on shutdown
    pub shutdown_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(1),
            reconcile_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Statistics about election transitions and label reconciliation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ElectionStats {
    pub elections_won: u64,
    pub leadership_losses: u64,
    pub new_leaders_observed: u64,
    pub label_updates: u64,
    pub reconcile_failures: u64,
    pub reconcile_conflicts: u64,
}

struct LeaderLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the election for the local member.
///
/// All state changes come from [`LeaseCallbacks`] delivered by the lease
/// client. Role label writes never overlap: the leader loop is spawned only
/// after the promotion write, and is awaited before the demotion write.
pub struct LeaderCoordinator {
    election: Arc<ElectionConfig>,
    config: CoordinatorConfig,
    lease_client: Arc<dyn LeaseClient>,
    reconciler: Arc<RoleReconciler>,
    metrics: Arc<MetricsReporter>,
    resource: ResourceRef,
    state: watch::Sender<ElectionState>,
    leader_loop: Mutex<Option<LeaderLoop>>,
    stats: Arc<RwLock<ElectionStats>>,
}

impl LeaderCoordinator {
    /// Create a new coordinator with the default loop tuning
    pub fn new(
        election: Arc<ElectionConfig>,
        lease_client: Arc<dyn LeaseClient>,
        resource_api: Arc<dyn ResourceApi>,
        metrics: Arc<MetricsReporter>,
    ) -> Self {
        let (state, _) = watch::channel(ElectionState::Unknown);
        let resource = election.identity.resource_ref();

        Self {
            election,
            config: CoordinatorConfig::default(),
            lease_client,
            reconciler: Arc::new(RoleReconciler::new(resource_api)),
            metrics,
            resource,
            state,
            leader_loop: Mutex::new(None),
            stats: Arc::new(RwLock::new(ElectionStats::default())),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the election until `shutdown` is cancelled.
    ///
    /// Fails before contacting the lease client when the timings are
    /// invalid. Reconciliation failures never end the loop.
    pub async fn run(&self, shutdown: CancellationToken) -> LeaderResult<()> {
        self.election.timings.validate()?;

        let identity = &self.election.identity;
        let span = info_span!(
            "election",
            member_id = identity.member_id(),
            election_group = identity.election_group(),
            namespace = identity.namespace(),
        );

        async {
            info!(
                lease_duration = ?self.election.timings.lease_duration,
                renew_deadline = ?self.election.timings.renew_deadline,
                retry_period = ?self.election.timings.retry_period,
                "Starting leader election"
            );

            let transitions = Transitions {
                coordinator: self,
                shutdown: &shutdown,
            };
            let result = self
                .lease_client
                .elect(
                    &identity.lease_ref(),
                    identity.member_id(),
                    &self.election.timings,
                    &transitions,
                    shutdown.clone(),
                )
                .await;

            // A lease client may return without reporting the loss.
            if self.is_leader() {
                self.step_down(&shutdown).await;
            }
            self.stop_leader_loop().await;

            match result {
                Ok(()) => {
                    info!("Leader election stopped");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Lease client failed");
                    Err(LeaderError::from(e))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Get the current election state
    pub fn state(&self) -> ElectionState {
        *self.state.borrow()
    }

    /// Check if this member is currently the leader
    pub fn is_leader(&self) -> bool {
        self.state().is_leader()
    }

    /// Watch election state transitions
    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state.subscribe()
    }

    /// Get election statistics
    pub fn stats(&self) -> ElectionStats {
        self.stats.read().clone()
    }

    pub fn election(&self) -> &ElectionConfig {
        &self.election
    }

    pub fn metrics(&self) -> &Arc<MetricsReporter> {
        &self.metrics
    }

    async fn become_leader(&self, shutdown: &CancellationToken) {
        if self.is_leader() {
            debug!("Already leading, ignoring duplicate acquisition");
            return;
        }

        info!(
            leader_id = self.election.identity.member_id(),
            "Became leader"
        );
        self.state.send_replace(ElectionState::Leader);
        self.stats.write().elections_won += 1;

        if let Err(e) = reconcile_role(
            &self.reconciler,
            &self.stats,
            &self.resource,
            Role::Leader,
            self.promotion_budget(),
        )
        .await
        {
            log_reconcile_failure(&e, Role::Leader);
        }

        self.metrics.set_leading(true);
        self.start_leader_loop(shutdown);
    }

    /// Bound for the promotion write. It runs inside the lease client's
    /// callback, so it must leave the first renewal at least one retry
    /// period before the renew deadline.
    fn promotion_budget(&self) -> Duration {
        let timings = &self.election.timings;
        self.config
            .reconcile_timeout
            .min(timings.renew_deadline.saturating_sub(timings.retry_period))
    }

    async fn observe_new_leader(&self, leader_id: &str, shutdown: &CancellationToken) {
        if leader_id == self.election.identity.member_id() {
            debug!(leader_id, "Ignoring new leader notification for ourselves");
            return;
        }

        info!(leader_id, "Another leader elected");
        self.stats.write().new_leaders_observed += 1;
        if self.is_leader() {
            warn!(leader_id, "New leader observed while leading, stepping down");
        }

        self.step_down(shutdown).await;
    }

    /// Moves to Follower. The gauge drops before the leader loop is torn
    /// down; the follower label is written after the loop has exited.
    async fn step_down(&self, shutdown: &CancellationToken) {
        let previous = self.state.send_replace(ElectionState::Follower);
        if previous.is_leader() {
            info!("Stopped being leader");
            self.stats.write().leadership_losses += 1;
        }

        self.metrics.set_leading(false);
        self.stop_leader_loop().await;

        if shutdown.is_cancelled() {
            self.demote_on_shutdown().await;
            return;
        }

        if let Err(e) = reconcile_role(
            &self.reconciler,
            &self.stats,
            &self.resource,
            Role::Follower,
            self.config.reconcile_timeout,
        )
        .await
        {
            log_reconcile_failure(&e, Role::Follower);
        }
    }

    /// Single best-effort follower write bounded by the shutdown grace.
    async fn demote_on_shutdown(&self) {
        let result = reconcile_role(
            &self.reconciler,
            &self.stats,
            &self.resource,
            Role::Follower,
            self.config.shutdown_grace,
        )
        .await;

        if let Err(e) = result {
            let err = LeaderError::ShutdownDemotion {
                reason: e.to_string(),
            };
            error!(error = %err, "Failed to set role label");
        }
    }

    fn start_leader_loop(&self, shutdown: &CancellationToken) {
        let token = shutdown.child_token();
        let handle = tokio::spawn(
            leader_loop(
                Arc::clone(&self.reconciler),
                Arc::clone(&self.stats),
                self.resource.clone(),
                self.config.clone(),
                token.clone(),
            )
            .instrument(Span::current()),
        );

        if let Some(stale) = self.leader_loop.lock().replace(LeaderLoop { token, handle }) {
            stale.token.cancel();
        }
    }

    async fn stop_leader_loop(&self) {
        let leader_loop = self.leader_loop.lock().take();
        if let Some(leader_loop) = leader_loop {
            leader_loop.token.cancel();
            if let Err(e) = leader_loop.handle.await {
                warn!(error = %e, "Leader loop task ended abnormally");
            }
        }
    }
}

/// Routes lease callbacks of one `run` into the coordinator.
struct Transitions<'a> {
    coordinator: &'a LeaderCoordinator,
    shutdown: &'a CancellationToken,
}

#[async_trait]
impl<'a> LeaseCallbacks for Transitions<'a> {
    async fn on_started_leading(&self) {
        self.coordinator.become_leader(self.shutdown).await;
    }

    async fn on_stopped_leading(&self) {
        self.coordinator.step_down(self.shutdown).await;
    }

    async fn on_new_leader(&self, identity: &str) {
        self.coordinator
            .observe_new_leader(identity, self.shutdown)
            .await;
    }
}

/// Re-applies the leader label every tick until cancelled. Failures are
/// left for the next tick; a reconciliation in flight is abandoned on
/// cancellation.
async fn leader_loop(
    reconciler: Arc<RoleReconciler>,
    stats: Arc<RwLock<ElectionStats>>,
    resource: ResourceRef,
    config: CoordinatorConfig,
    token: CancellationToken,
) {
    let mut ticker = interval_at(
        Instant::now() + config.reconcile_interval,
        config.reconcile_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = reconcile_role(
                &reconciler,
                &stats,
                &resource,
                Role::Leader,
                config.reconcile_timeout,
            ) => {
                if let Err(e) = result {
                    log_reconcile_failure(&e, Role::Leader);
                }
            }
        }
    }

    info!("Stopped leader loop");
}

async fn reconcile_role(
    reconciler: &RoleReconciler,
    stats: &RwLock<ElectionStats>,
    resource: &ResourceRef,
    role: Role,
    limit: Duration,
) -> LeaderResult<ReconcileOutcome> {
    let result = match timeout(limit, reconciler.set_role(resource, role)).await {
        Ok(result) => result,
        Err(_) => Err(LeaderError::Reconciliation {
            resource: resource.to_string(),
            reason: format!("timed out after {limit:?}"),
        }),
    };

    let mut stats = stats.write();
    match &result {
        Ok(ReconcileOutcome::Updated) => stats.label_updates += 1,
        Ok(ReconcileOutcome::Unchanged) => {}
        Err(LeaderError::ReconciliationConflict { .. }) => {
            stats.reconcile_conflicts += 1;
            stats.reconcile_failures += 1;
        }
        Err(_) => stats.reconcile_failures += 1,
    }

    result
}

fn log_reconcile_failure(err: &LeaderError, role: Role) {
    match err {
        LeaderError::ReconciliationConflict { .. } => {
            warn!(role = %role, error = %err, "Role label changed concurrently, retrying later");
        }
        _ => error!(role = %role, error = %err, "Failed to set role label"),
    }
}
