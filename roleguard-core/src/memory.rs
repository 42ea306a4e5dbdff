//! In-memory collaborators.
//!
//! The resource API and lease store keep their state behind an `Arc`, so
//! clones share the same table. They are suitable for tests and local runs
//! where no cluster API is available, and expose hooks to simulate external
//! mutation, write conflicts and unavailability. [`ManualLeaseClient`]
//! replaces the whole lease protocol with transitions fed by hand.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::lease::{LeaseCallbacks, LeaseClient, LeaseRecord, LeaseStore, VersionedLease};
use crate::resource::{Labels, Resource, ResourceApi};
use crate::{ElectionTimings, LeaseRef, ResourceRef, Result, RoleguardError};

const RESOURCE_KIND: &str = "resource";
const LEASE_KIND: &str = "lease";

#[derive(Debug, Default)]
struct ResourceTable {
    resources: HashMap<ResourceRef, StoredResource>,
    next_version: u64,
    pending_conflicts: u32,
    unavailable: bool,
}

impl ResourceTable {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

#[derive(Debug, Clone)]
struct StoredResource {
    labels: Option<Labels>,
    version: u64,
    writes: u64,
}

/// Resource API backed by a shared in-process table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceApi {
    table: Arc<RwLock<ResourceTable>>,
}

impl InMemoryResourceApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a resource. `None` models a resource without a
    /// label map.
    pub fn insert(&self, reference: ResourceRef, labels: Option<Labels>) {
        let mut table = self.table.write();
        let version = table.bump_version();
        table.resources.insert(
            reference,
            StoredResource {
                labels,
                version,
                writes: 0,
            },
        );
    }

    pub fn remove(&self, reference: &ResourceRef) {
        self.table.write().resources.remove(reference);
    }

    pub fn labels(&self, reference: &ResourceRef) -> Option<Labels> {
        self.table
            .read()
            .resources
            .get(reference)
            .and_then(|stored| stored.labels.clone())
    }

    pub fn label(&self, reference: &ResourceRef, key: &str) -> Option<String> {
        self.labels(reference)?.get(key).cloned()
    }

    /// Mutates a label the way an outside actor would: the version moves
    /// on but the write is not counted against the API's clients.
    pub fn set_label_externally(&self, reference: &ResourceRef, key: &str, value: &str) {
        let mut table = self.table.write();
        let version = table.bump_version();
        if let Some(stored) = table.resources.get_mut(reference) {
            stored
                .labels
                .get_or_insert_with(Labels::new)
                .insert(key.to_string(), value.to_string());
            stored.version = version;
        }
    }

    /// Number of successful `update` calls against a resource.
    pub fn write_count(&self, reference: &ResourceRef) -> u64 {
        self.table
            .read()
            .resources
            .get(reference)
            .map_or(0, |stored| stored.writes)
    }

    /// Makes the next `count` updates fail with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.table.write().pending_conflicts += count;
    }

    /// While set, every call fails with an API error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.table.write().unavailable = unavailable;
    }
}

#[async_trait]
impl ResourceApi for InMemoryResourceApi {
    async fn get(&self, reference: &ResourceRef) -> Result<Resource> {
        let table = self.table.read();
        if table.unavailable {
            return Err(RoleguardError::api("resource API unavailable"));
        }

        table
            .resources
            .get(reference)
            .map(|stored| Resource {
                reference: reference.clone(),
                labels: stored.labels.clone(),
                version: stored.version.to_string(),
            })
            .ok_or_else(|| RoleguardError::not_found(RESOURCE_KIND, reference.to_string()))
    }

    async fn update(&self, resource: &Resource) -> Result<Resource> {
        let mut table = self.table.write();
        if table.unavailable {
            return Err(RoleguardError::api("resource API unavailable"));
        }

        let name = resource.reference.to_string();
        let current = match table.resources.get(&resource.reference) {
            Some(stored) => stored.version,
            None => return Err(RoleguardError::not_found(RESOURCE_KIND, name)),
        };

        if table.pending_conflicts > 0 {
            table.pending_conflicts -= 1;
            return Err(RoleguardError::conflict(RESOURCE_KIND, name));
        }

        if current.to_string() != resource.version {
            return Err(RoleguardError::conflict(RESOURCE_KIND, name));
        }

        let version = table.bump_version();
        let stored = table
            .resources
            .get_mut(&resource.reference)
            .ok_or_else(|| RoleguardError::internal("resource vanished under write lock"))?;
        stored.labels = resource.labels.clone();
        stored.version = version;
        stored.writes += 1;

        Ok(Resource {
            reference: resource.reference.clone(),
            labels: stored.labels.clone(),
            version: version.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct LeaseTable {
    leases: HashMap<LeaseRef, (LeaseRecord, u64)>,
    next_version: u64,
    unavailable: bool,
}

/// Lease store backed by a shared in-process table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    table: Arc<RwLock<LeaseTable>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, lease: &LeaseRef) -> Option<LeaseRecord> {
        self.table
            .read()
            .leases
            .get(lease)
            .map(|(record, _)| record.clone())
    }

    pub fn holder(&self, lease: &LeaseRef) -> Option<String> {
        self.record(lease)?.holder().map(str::to_string)
    }

    /// While set, every call fails with an API error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.table.write().unavailable = unavailable;
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get(&self, lease: &LeaseRef) -> Result<Option<VersionedLease>> {
        let table = self.table.read();
        if table.unavailable {
            return Err(RoleguardError::api("lease store unavailable"));
        }

        Ok(table
            .leases
            .get(lease)
            .map(|(record, version)| VersionedLease {
                record: record.clone(),
                version: version.to_string(),
            }))
    }

    async fn create(&self, lease: &LeaseRef, record: &LeaseRecord) -> Result<VersionedLease> {
        let mut table = self.table.write();
        if table.unavailable {
            return Err(RoleguardError::api("lease store unavailable"));
        }
        if table.leases.contains_key(lease) {
            return Err(RoleguardError::conflict(LEASE_KIND, lease.to_string()));
        }

        table.next_version += 1;
        let version = table.next_version;
        table.leases.insert(lease.clone(), (record.clone(), version));

        Ok(VersionedLease {
            record: record.clone(),
            version: version.to_string(),
        })
    }

    async fn update(
        &self,
        lease: &LeaseRef,
        record: &LeaseRecord,
        version: &str,
    ) -> Result<VersionedLease> {
        let mut table = self.table.write();
        if table.unavailable {
            return Err(RoleguardError::api("lease store unavailable"));
        }

        let current = match table.leases.get(lease) {
            Some((_, current)) => *current,
            None => return Err(RoleguardError::not_found(LEASE_KIND, lease.to_string())),
        };
        if current.to_string() != version {
            return Err(RoleguardError::conflict(LEASE_KIND, lease.to_string()));
        }

        table.next_version += 1;
        let next = table.next_version;
        table.leases.insert(lease.clone(), (record.clone(), next));

        Ok(VersionedLease {
            record: record.clone(),
            version: next.to_string(),
        })
    }
}

/// Transition fed into a [`ManualLeaseClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseEvent {
    Acquired,
    Lost,
    NewLeader(String),
}

type LeaseCommand = (LeaseEvent, oneshot::Sender<()>);

/// Lease client whose transitions are driven through a [`ManualLeaseHandle`].
///
/// On cancellation it reports `on_stopped_leading` if the last event left
/// the member leading, the way a client that releases on cancel would.
pub struct ManualLeaseClient {
    commands: Mutex<mpsc::UnboundedReceiver<LeaseCommand>>,
}

/// Sending side of a [`ManualLeaseClient`].
#[derive(Debug, Clone)]
pub struct ManualLeaseHandle {
    commands: mpsc::UnboundedSender<LeaseCommand>,
}

/// Creates a manual lease client and the handle that drives it.
pub fn manual_lease_client() -> (ManualLeaseClient, ManualLeaseHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ManualLeaseClient {
            commands: Mutex::new(rx),
        },
        ManualLeaseHandle { commands: tx },
    )
}

impl ManualLeaseHandle {
    /// Delivers an event and waits until its callback has returned.
    pub async fn send(&self, event: LeaseEvent) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send((event, ack_tx))
            .map_err(|_| RoleguardError::internal("lease client stopped"))?;
        ack_rx
            .await
            .map_err(|_| RoleguardError::internal("lease client stopped before delivering event"))
    }
}

#[async_trait]
impl LeaseClient for ManualLeaseClient {
    async fn elect(
        &self,
        _lease: &LeaseRef,
        _identity: &str,
        _timings: &ElectionTimings,
        callbacks: &dyn LeaseCallbacks,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut commands = self.commands.lock().await;
        let mut leading = false;

        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => command,
            };

            let Some((event, ack)) = command else {
                shutdown.cancelled().await;
                break;
            };

            match &event {
                LeaseEvent::Acquired => {
                    leading = true;
                    callbacks.on_started_leading().await;
                }
                LeaseEvent::Lost => {
                    leading = false;
                    callbacks.on_stopped_leading().await;
                }
                LeaseEvent::NewLeader(identity) => {
                    leading = false;
                    callbacks.on_new_leader(identity).await;
                }
            }
            let _ = ack.send(());
        }

        if leading {
            callbacks.on_stopped_leading().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn pod() -> ResourceRef {
        ResourceRef::new("default", "pod-1")
    }

    fn record(holder: &str) -> LeaseRecord {
        let now = SystemTime::now();
        LeaseRecord {
            holder_identity: Some(holder.to_string()),
            lease_duration: Duration::from_secs(15),
            acquire_time: now,
            renew_time: now,
            lease_transitions: 0,
        }
    }

    #[tokio::test]
    async fn test_resource_update_requires_current_version() {
        let api = InMemoryResourceApi::new();
        api.insert(pod(), None);

        let mut resource = api.get(&pod()).await.unwrap();
        resource.set_label("role", "true");

        api.set_label_externally(&pod(), "other", "x");
        let err = api.update(&resource).await.unwrap_err();
        assert!(err.is_conflict());

        let mut fresh = api.get(&pod()).await.unwrap();
        fresh.set_label("role", "true");
        api.update(&fresh).await.unwrap();

        assert_eq!(api.label(&pod(), "role").as_deref(), Some("true"));
        assert_eq!(api.label(&pod(), "other").as_deref(), Some("x"));
        assert_eq!(api.write_count(&pod()), 1);
    }

    #[tokio::test]
    async fn test_resource_missing_and_injected_conflicts() {
        let api = InMemoryResourceApi::new();
        assert!(api.get(&pod()).await.unwrap_err().is_not_found());

        api.insert(pod(), Some(Labels::new()));
        api.inject_conflicts(1);
        let resource = api.get(&pod()).await.unwrap();
        assert!(api.update(&resource).await.unwrap_err().is_conflict());
        assert!(api.update(&resource).await.is_ok());

        api.set_unavailable(true);
        assert!(matches!(
            api.get(&pod()).await,
            Err(RoleguardError::Api { .. })
        ));
    }

    #[tokio::test]
    async fn test_lease_create_and_versioned_update() {
        let store = InMemoryLeaseStore::new();
        let lease = LeaseRef::new("default", "group");

        assert!(store.get(&lease).await.unwrap().is_none());

        let created = store.create(&lease, &record("m1")).await.unwrap();
        assert!(store.create(&lease, &record("m2")).await.unwrap_err().is_conflict());

        let updated = store
            .update(&lease, &record("m2"), &created.version)
            .await
            .unwrap();
        assert_eq!(store.holder(&lease).as_deref(), Some("m2"));

        let stale = store.update(&lease, &record("m3"), &created.version).await;
        assert!(stale.unwrap_err().is_conflict());
        assert_ne!(updated.version, created.version);
    }
}
