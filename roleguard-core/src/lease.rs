//! Lease collaborators: the storage holding lease records and the client
//! that drives acquisition and renewal against it.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

use crate::{ElectionTimings, LeaseRef, Result};

/// Contents of a lease record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    /// Current holder, `None` when the lease was released
    pub holder_identity: Option<String>,
    pub lease_duration: Duration,
    pub acquire_time: SystemTime,
    pub renew_time: SystemTime,
    /// Number of times the lease changed hands
    pub lease_transitions: u32,
}

impl LeaseRecord {
    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity.as_deref() == Some(identity)
    }

    /// Holder identity, treating an empty string as no holder.
    pub fn holder(&self) -> Option<&str> {
        self.holder_identity.as_deref().filter(|h| !h.is_empty())
    }
}

/// A lease record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedLease {
    pub record: LeaseRecord,
    pub version: String,
}

/// Storage for lease records with optimistic concurrency.
///
/// Mutual exclusion between members rests entirely on `update` rejecting
/// stale versions.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Reads the lease, `None` if it does not exist yet.
    async fn get(&self, lease: &LeaseRef) -> Result<Option<VersionedLease>>;

    /// Creates the lease, failing with `Conflict` if it already exists.
    async fn create(&self, lease: &LeaseRef, record: &LeaseRecord) -> Result<VersionedLease>;

    /// Replaces the lease, failing with `Conflict` if `version` is stale.
    async fn update(
        &self,
        lease: &LeaseRef,
        record: &LeaseRecord,
        version: &str,
    ) -> Result<VersionedLease>;
}

/// Transition notifications delivered by a [`LeaseClient`].
///
/// Invoked sequentially on the task running [`LeaseClient::elect`], at most
/// once per transition and in the order the transitions happen.
#[async_trait]
pub trait LeaseCallbacks: Send + Sync {
    /// The local member acquired the lease.
    async fn on_started_leading(&self);

    /// The local member lost or released the lease.
    async fn on_stopped_leading(&self);

    /// Another member became the holder.
    async fn on_new_leader(&self, identity: &str);
}

/// Drives acquisition and renewal of a lease for one identity.
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Runs the election until `shutdown` is cancelled.
    ///
    /// Returns `Ok` after a clean shutdown. Transient store failures are
    /// retried on the client's own cadence and never surface here.
    async fn elect(
        &self,
        lease: &LeaseRef,
        identity: &str,
        timings: &ElectionTimings,
        callbacks: &dyn LeaseCallbacks,
        shutdown: CancellationToken,
    ) -> Result<()>;
}
