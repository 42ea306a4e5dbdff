//! Lease client driving acquisition and renewal against a [`LeaseStore`].
//!
//! The cadence follows the Kubernetes client-go elector: a candidate tries
//! to acquire every retry period (with jitter), the holder renews every
//! retry period and steps down once the renew deadline passes without a
//! successful renewal. Expiry of someone else's lease is judged on the
//! local clock from the moment the record was last seen changing, so clock
//! skew between members does not matter. Mutual exclusion itself comes
//! from the store rejecting stale versions.

use async_trait::async_trait;
use rand::Rng;
use roleguard_core::{
    ElectionTimings, LeaseCallbacks, LeaseClient, LeaseRecord, LeaseRef, LeaseStore, Result,
    VersionedLease,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum extra wait between acquisition attempts, as a factor of the
/// retry period.
pub const JITTER_FACTOR: f64 = 1.2;

/// Lease duration written when the holder releases the lease.
const RELEASED_LEASE_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewOutcome {
    Lost,
    Cancelled,
}

/// What this member last saw in the store.
#[derive(Debug, Default)]
struct Observation {
    record: Option<LeaseRecord>,
    version: Option<String>,
    observed_at: Option<Instant>,
    reported_leader: Option<String>,
}

impl Observation {
    /// Records what was read or written. The observation clock restarts
    /// only when the stored version moved.
    fn observe(&mut self, lease: VersionedLease) {
        if self.version.as_deref() != Some(lease.version.as_str()) {
            self.record = Some(lease.record);
            self.version = Some(lease.version);
            self.observed_at = Some(Instant::now());
        }
    }

    fn holder(&self) -> Option<&str> {
        self.record.as_ref()?.holder()
    }

    /// Whether another member holds a lease that has not yet expired by the
    /// local observation clock.
    fn held_by_other(&self, identity: &str) -> bool {
        let (Some(record), Some(observed_at)) = (&self.record, self.observed_at) else {
            return false;
        };
        match record.holder() {
            Some(holder) if holder != identity => {
                observed_at + record.lease_duration > Instant::now()
            }
            _ => false,
        }
    }
}

/// [`LeaseClient`] implementation over any [`LeaseStore`].
pub struct LeaseElector {
    store: Arc<dyn LeaseStore>,
    release_on_cancel: bool,
}

impl LeaseElector {
    /// Creates an elector that releases the lease when cancelled.
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            release_on_cancel: true,
        }
    }

    pub fn with_release_on_cancel(mut self, release: bool) -> Self {
        self.release_on_cancel = release;
        self
    }

    /// Returns the start of the successful attempt, `None` once cancelled.
    async fn acquire(
        &self,
        lease: &LeaseRef,
        identity: &str,
        timings: &ElectionTimings,
        observation: &mut Observation,
        callbacks: &dyn LeaseCallbacks,
        shutdown: &CancellationToken,
    ) -> Option<Instant> {
        info!(lease = %lease, identity, "Attempting to acquire lease");

        loop {
            if shutdown.is_cancelled() {
                return None;
            }

            let attempt_started = Instant::now();
            let acquired = self
                .try_acquire_or_renew(lease, identity, timings, observation)
                .await;
            self.report_transition(identity, observation, callbacks).await;

            if acquired {
                info!(lease = %lease, identity, "Successfully acquired lease");
                return Some(attempt_started);
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = sleep(jittered(timings.retry_period)) => {}
            }
        }
    }

    /// Renews every retry period. The deadline runs from the start of the
    /// last successful attempt, so time spent in callbacks counts against it,
    /// and an attempt that fell behind schedule runs right away.
    async fn renew(
        &self,
        lease: &LeaseRef,
        identity: &str,
        timings: &ElectionTimings,
        observation: &mut Observation,
        acquired_at: Instant,
        shutdown: &CancellationToken,
    ) -> RenewOutcome {
        let mut last_success = acquired_at;
        let mut next_attempt = acquired_at + timings.retry_period;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return RenewOutcome::Cancelled,
                _ = sleep_until(next_attempt) => {}
            }

            let deadline = last_success + timings.renew_deadline;
            let attempt_started = Instant::now();
            next_attempt = attempt_started + timings.retry_period;

            if attempt_started >= deadline {
                warn!(lease = %lease, identity, "Renew deadline passed before renewal");
                return RenewOutcome::Lost;
            }

            let remaining = deadline.saturating_duration_since(attempt_started);
            let renewed = timeout(
                remaining,
                self.try_acquire_or_renew(lease, identity, timings, observation),
            )
            .await
            .unwrap_or(false);

            if renewed {
                debug!(lease = %lease, identity, "Renewed lease");
                last_success = attempt_started;
                continue;
            }

            if observation.held_by_other(identity) {
                warn!(
                    lease = %lease,
                    identity,
                    holder = observation.holder().unwrap_or_default(),
                    "Lease taken over by another member"
                );
                return RenewOutcome::Lost;
            }

            if Instant::now() >= deadline {
                warn!(lease = %lease, identity, "Failed to renew lease before deadline");
                return RenewOutcome::Lost;
            }
        }
    }

    /// One attempt to create, take over or renew the lease.
    async fn try_acquire_or_renew(
        &self,
        lease: &LeaseRef,
        identity: &str,
        timings: &ElectionTimings,
        observation: &mut Observation,
    ) -> bool {
        let now = SystemTime::now();

        let existing = match self.store.get(lease).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(lease = %lease, identity, error = %e, "Failed to read lease");
                return false;
            }
        };

        let Some(existing) = existing else {
            let record = LeaseRecord {
                holder_identity: Some(identity.to_string()),
                lease_duration: timings.lease_duration,
                acquire_time: now,
                renew_time: now,
                lease_transitions: 0,
            };
            return match self.store.create(lease, &record).await {
                Ok(created) => {
                    observation.observe(created);
                    true
                }
                Err(e) => {
                    debug!(lease = %lease, identity, error = %e, "Failed to create lease");
                    false
                }
            };
        };

        observation.observe(existing.clone());
        if observation.held_by_other(identity) {
            return false;
        }

        let mut record = LeaseRecord {
            holder_identity: Some(identity.to_string()),
            lease_duration: timings.lease_duration,
            acquire_time: existing.record.acquire_time,
            renew_time: now,
            lease_transitions: existing.record.lease_transitions,
        };
        if !existing.record.is_held_by(identity) {
            record.acquire_time = now;
            record.lease_transitions += 1;
        }

        match self.store.update(lease, &record, &existing.version).await {
            Ok(updated) => {
                observation.observe(updated);
                true
            }
            Err(e) if e.is_conflict() => {
                debug!(lease = %lease, identity, "Lease changed concurrently");
                false
            }
            Err(e) => {
                warn!(lease = %lease, identity, error = %e, "Failed to update lease");
                false
            }
        }
    }

    /// Reports a holder change to the callbacks when the holder is someone
    /// else. Seeing ourselves as holder only updates the bookkeeping.
    async fn report_transition(
        &self,
        identity: &str,
        observation: &mut Observation,
        callbacks: &dyn LeaseCallbacks,
    ) {
        let Some(holder) = observation.holder().map(str::to_string) else {
            return;
        };
        if observation.reported_leader.as_deref() == Some(holder.as_str()) {
            return;
        }

        observation.reported_leader = Some(holder.clone());
        if holder != identity {
            callbacks.on_new_leader(&holder).await;
        }
    }

    async fn release(&self, lease: &LeaseRef, identity: &str, timings: &ElectionTimings) {
        match timeout(timings.renew_deadline, self.try_release(lease, identity)).await {
            Ok(Ok(true)) => info!(lease = %lease, identity, "Released lease"),
            Ok(Ok(false)) => debug!(lease = %lease, identity, "Lease not held, nothing to release"),
            Ok(Err(e)) => warn!(lease = %lease, identity, error = %e, "Failed to release lease"),
            Err(_) => warn!(lease = %lease, identity, "Timed out releasing lease"),
        }
    }

    /// Clears the holder so other members can acquire without waiting for
    /// the lease to expire.
    async fn try_release(&self, lease: &LeaseRef, identity: &str) -> Result<bool> {
        let Some(current) = self.store.get(lease).await? else {
            return Ok(false);
        };
        if !current.record.is_held_by(identity) {
            return Ok(false);
        }

        let now = SystemTime::now();
        let record = LeaseRecord {
            holder_identity: None,
            lease_duration: RELEASED_LEASE_DURATION,
            acquire_time: now,
            renew_time: now,
            lease_transitions: current.record.lease_transitions,
        };
        self.store.update(lease, &record, &current.version).await?;
        Ok(true)
    }
}

#[async_trait]
impl LeaseClient for LeaseElector {
    async fn elect(
        &self,
        lease: &LeaseRef,
        identity: &str,
        timings: &ElectionTimings,
        callbacks: &dyn LeaseCallbacks,
        shutdown: CancellationToken,
    ) -> Result<()> {
        timings.validate()?;
        let mut observation = Observation::default();

        loop {
            let Some(acquired_at) = self
                .acquire(
                    lease,
                    identity,
                    timings,
                    &mut observation,
                    callbacks,
                    &shutdown,
                )
                .await
            else {
                return Ok(());
            };

            observation.reported_leader = Some(identity.to_string());
            callbacks.on_started_leading().await;

            let outcome = self
                .renew(
                    lease,
                    identity,
                    timings,
                    &mut observation,
                    acquired_at,
                    &shutdown,
                )
                .await;

            if outcome == RenewOutcome::Cancelled && self.release_on_cancel {
                self.release(lease, identity, timings).await;
            }
            callbacks.on_stopped_leading().await;

            if outcome == RenewOutcome::Cancelled {
                return Ok(());
            }
            info!(lease = %lease, identity, "Lease lost, re-entering acquisition");
        }
    }
}

fn jittered(period: Duration) -> Duration {
    let factor = rand::thread_rng().gen::<f64>() * JITTER_FACTOR;
    period + period.mul_f64(factor)
}
