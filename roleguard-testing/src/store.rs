//! Lease store view with per-member isolation.

use async_trait::async_trait;
use parking_lot::RwLock;
use roleguard_core::memory::InMemoryLeaseStore;
use roleguard_core::{LeaseRecord, LeaseRef, LeaseStore, Result, RoleguardError, VersionedLease};
use std::collections::HashSet;
use std::sync::Arc;

/// Set of members currently cut off from the lease store.
#[derive(Debug, Clone, Default)]
pub struct Isolation {
    members: Arc<RwLock<HashSet<String>>>,
}

impl Isolation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolate(&self, member_id: &str) {
        self.members.write().insert(member_id.to_string());
    }

    pub fn heal(&self, member_id: &str) {
        self.members.write().remove(member_id);
    }

    pub fn heal_all(&self) {
        self.members.write().clear();
    }

    pub fn is_isolated(&self, member_id: &str) -> bool {
        self.members.read().contains(member_id)
    }
}

/// One member's view of a shared [`InMemoryLeaseStore`]. Calls fail with an
/// API error while the member is isolated.
#[derive(Debug, Clone)]
pub struct MemberLeaseStore {
    inner: InMemoryLeaseStore,
    member_id: String,
    isolation: Isolation,
}

impl MemberLeaseStore {
    pub fn new(inner: InMemoryLeaseStore, member_id: impl Into<String>, isolation: Isolation) -> Self {
        Self {
            inner,
            member_id: member_id.into(),
            isolation,
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if self.isolation.is_isolated(&self.member_id) {
            return Err(RoleguardError::api(format!(
                "lease store unreachable from {}",
                self.member_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemberLeaseStore {
    async fn get(&self, lease: &LeaseRef) -> Result<Option<VersionedLease>> {
        self.check_reachable()?;
        self.inner.get(lease).await
    }

    async fn create(&self, lease: &LeaseRef, record: &LeaseRecord) -> Result<VersionedLease> {
        self.check_reachable()?;
        self.inner.create(lease, record).await
    }

    async fn update(
        &self,
        lease: &LeaseRef,
        record: &LeaseRecord,
        version: &str,
    ) -> Result<VersionedLease> {
        self.check_reachable()?;
        self.inner.update(lease, record, version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_isolation_is_per_member() {
        let shared = InMemoryLeaseStore::new();
        let isolation = Isolation::new();
        let m1 = MemberLeaseStore::new(shared.clone(), "m1", isolation.clone());
        let m2 = MemberLeaseStore::new(shared, "m2", isolation.clone());
        let lease = LeaseRef::new("default", "group");

        isolation.isolate("m1");
        assert!(m1.get(&lease).await.unwrap_err().is_retryable());
        assert!(m2.get(&lease).await.unwrap().is_none());

        isolation.heal("m1");
        assert!(m1.get(&lease).await.is_ok());
    }
}
