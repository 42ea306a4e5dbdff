//! Lease records stored in `coordination.k8s.io/v1` Leases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use roleguard_core::{LeaseRecord, LeaseRef, LeaseStore, Result, RoleguardError, VersionedLease};
use std::time::{Duration, SystemTime};

use crate::map_error;

const LEASE_KIND: &str = "lease";

/// [`LeaseStore`] over the Lease objects of a cluster.
///
/// Optimistic concurrency comes from the object's `resourceVersion`:
/// replacing with a stale version fails with 409.
#[derive(Clone)]
pub struct KubeLeaseStore {
    client: Client,
}

impl KubeLeaseStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn leases(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn get(&self, lease: &LeaseRef) -> Result<Option<VersionedLease>> {
        let found = self
            .leases(&lease.namespace)
            .get_opt(&lease.name)
            .await
            .map_err(|e| map_error(LEASE_KIND, &lease.to_string(), e))?;

        found.map(|object| versioned(lease, object)).transpose()
    }

    async fn create(&self, lease: &LeaseRef, record: &LeaseRecord) -> Result<VersionedLease> {
        let object = lease_object(lease, record, None);
        let created = self
            .leases(&lease.namespace)
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| map_error(LEASE_KIND, &lease.to_string(), e))?;

        versioned(lease, created)
    }

    async fn update(
        &self,
        lease: &LeaseRef,
        record: &LeaseRecord,
        version: &str,
    ) -> Result<VersionedLease> {
        let object = lease_object(lease, record, Some(version));
        let replaced = self
            .leases(&lease.namespace)
            .replace(&lease.name, &PostParams::default(), &object)
            .await
            .map_err(|e| map_error(LEASE_KIND, &lease.to_string(), e))?;

        versioned(lease, replaced)
    }
}

fn versioned(lease: &LeaseRef, object: Lease) -> Result<VersionedLease> {
    let version = object.metadata.resource_version.ok_or_else(|| {
        RoleguardError::api(format!("lease {lease} returned without resourceVersion"))
    })?;

    Ok(VersionedLease {
        record: record_from_spec(&object.spec.unwrap_or_default()),
        version,
    })
}

fn lease_object(lease: &LeaseRef, record: &LeaseRecord, version: Option<&str>) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(lease.name.clone()),
            namespace: Some(lease.namespace.clone()),
            resource_version: version.map(str::to_string),
            ..Default::default()
        },
        spec: Some(spec_from_record(record)),
    }
}

fn record_from_spec(spec: &LeaseSpec) -> LeaseRecord {
    let seconds = u64::try_from(spec.lease_duration_seconds.unwrap_or_default()).unwrap_or(0);

    LeaseRecord {
        holder_identity: spec.holder_identity.clone(),
        lease_duration: Duration::from_secs(seconds),
        acquire_time: to_system_time(spec.acquire_time.as_ref()),
        renew_time: to_system_time(spec.renew_time.as_ref()),
        lease_transitions: u32::try_from(spec.lease_transitions.unwrap_or_default()).unwrap_or(0),
    }
}

fn spec_from_record(record: &LeaseRecord) -> LeaseSpec {
    LeaseSpec {
        holder_identity: record.holder_identity.clone(),
        lease_duration_seconds: Some(
            i32::try_from(record.lease_duration.as_secs()).unwrap_or(i32::MAX),
        ),
        acquire_time: Some(MicroTime(DateTime::<Utc>::from(record.acquire_time))),
        renew_time: Some(MicroTime(DateTime::<Utc>::from(record.renew_time))),
        lease_transitions: Some(i32::try_from(record.lease_transitions).unwrap_or(i32::MAX)),
        ..Default::default()
    }
}

fn to_system_time(time: Option<&MicroTime>) -> SystemTime {
    time.map_or(SystemTime::UNIX_EPOCH, |MicroTime(at)| SystemTime::from(*at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(holder: Option<&str>) -> LeaseRecord {
        let acquired = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        LeaseRecord {
            holder_identity: holder.map(str::to_string),
            lease_duration: Duration::from_secs(15),
            acquire_time: acquired,
            renew_time: acquired + Duration::from_millis(2_500),
            lease_transitions: 3,
        }
    }

    #[test]
    fn test_record_survives_spec_conversion() {
        let original = record(Some("m1"));
        assert_eq!(record_from_spec(&spec_from_record(&original)), original);

        let released = record(None);
        assert_eq!(record_from_spec(&spec_from_record(&released)), released);
    }

    #[test]
    fn test_sparse_spec_defaults() {
        let record = record_from_spec(&LeaseSpec::default());

        assert_eq!(record.holder_identity, None);
        assert_eq!(record.lease_duration, Duration::ZERO);
        assert_eq!(record.renew_time, SystemTime::UNIX_EPOCH);
        assert_eq!(record.lease_transitions, 0);
    }

    #[test]
    fn test_update_object_carries_version() {
        let lease = LeaseRef::new("prod", "payments");
        let object = lease_object(&lease, &record(Some("m1")), Some("42"));

        assert_eq!(object.metadata.name.as_deref(), Some("payments"));
        assert_eq!(object.metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(object.metadata.resource_version.as_deref(), Some("42"));

        let err = versioned(&lease, lease_object(&lease, &record(None), None)).unwrap_err();
        assert!(matches!(err, RoleguardError::Api { .. }));
    }
}
