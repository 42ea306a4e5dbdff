//! Role labels on Pods.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use roleguard_core::{Resource, ResourceApi, ResourceRef, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::map_error;

const POD_KIND: &str = "pod";

/// [`ResourceApi`] over the Pods of a cluster.
#[derive(Clone)]
pub struct KubePodApi {
    client: Client,
}

impl KubePodApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceApi for KubePodApi {
    async fn get(&self, reference: &ResourceRef) -> Result<Resource> {
        let pod = self
            .pods(&reference.namespace)
            .get(&reference.name)
            .await
            .map_err(|e| map_error(POD_KIND, &reference.to_string(), e))?;

        Ok(pod_to_resource(reference, &pod))
    }

    async fn update(&self, resource: &Resource) -> Result<Resource> {
        let reference = &resource.reference;
        debug!(pod = %reference, version = %resource.version, "Patching pod labels");

        let pod = self
            .pods(&reference.namespace)
            .patch(
                &reference.name,
                &PatchParams::default(),
                &Patch::Merge(label_patch(resource)),
            )
            .await
            .map_err(|e| map_error(POD_KIND, &reference.to_string(), e))?;

        Ok(pod_to_resource(reference, &pod))
    }
}

fn pod_to_resource(reference: &ResourceRef, pod: &Pod) -> Resource {
    Resource {
        reference: reference.clone(),
        labels: pod.metadata.labels.clone(),
        version: pod.metadata.resource_version.clone().unwrap_or_default(),
    }
}

/// Merge patch setting every label of `resource`. The API server rejects it
/// with 409 when the pod moved past `resource.version`.
fn label_patch(resource: &Resource) -> Value {
    json!({
        "metadata": {
            "resourceVersion": resource.version,
            "labels": resource.labels.clone().unwrap_or_default(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use roleguard_core::{Labels, ROLE_LABEL_KEY};

    fn pod(labels: Option<Labels>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("default".to_string()),
                labels,
                resource_version: Some("4711".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_without_labels_converts() {
        let reference = ResourceRef::new("default", "web-0");
        let resource = pod_to_resource(&reference, &pod(None));

        assert_eq!(resource.reference, reference);
        assert_eq!(resource.labels, None);
        assert_eq!(resource.version, "4711");
    }

    #[test]
    fn test_label_patch_carries_version_precondition() {
        let mut labels = Labels::new();
        labels.insert("app".to_string(), "web".to_string());
        let mut resource = pod_to_resource(&ResourceRef::new("default", "web-0"), &pod(Some(labels)));
        resource.set_label(ROLE_LABEL_KEY, "true");

        let patch = label_patch(&resource);
        assert_eq!(patch["metadata"]["resourceVersion"], "4711");
        assert_eq!(patch["metadata"]["labels"]["app"], "web");
        assert_eq!(patch["metadata"]["labels"][ROLE_LABEL_KEY], "true");
    }
}
