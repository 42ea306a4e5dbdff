//! # Roleguard Kube
//!
//! Kubernetes implementations of the roleguard collaborators:
//!
//! - [`KubePodApi`]: role labels on Pods, written with a merge patch that
//!   carries the read `resourceVersion` as a precondition
//! - [`KubeLeaseStore`]: lease records in `coordination.k8s.io/v1` Leases
//!
//! API status codes are mapped onto [`RoleguardError`]: 404 becomes
//! `NotFound`, 409 becomes `Conflict`, everything else `Api`.

use kube::Client;
use roleguard_core::{Result, RoleguardError};
use tracing::debug;

pub mod leases;
pub mod pods;

pub use leases::KubeLeaseStore;
pub use pods::KubePodApi;

/// Builds a client from the in-cluster environment or the local kubeconfig.
pub async fn default_client() -> Result<Client> {
    let client = Client::try_default()
        .await
        .map_err(|e| RoleguardError::api(format!("failed to create Kubernetes client: {e}")))?;
    debug!(namespace = client.default_namespace(), "Created Kubernetes client");
    Ok(client)
}

pub(crate) fn map_error(kind: &str, name: &str, err: kube::Error) -> RoleguardError {
    match err {
        kube::Error::Api(response) if response.code == 404 => RoleguardError::not_found(kind, name),
        kube::Error::Api(response) if response.code == 409 => RoleguardError::conflict(kind, name),
        other => RoleguardError::api(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed: {reason}"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_status_codes_map_to_error_kinds() {
        assert_eq!(
            map_error("pod", "default/web-0", api_error(404, "NotFound")),
            RoleguardError::not_found("pod", "default/web-0")
        );
        assert_eq!(
            map_error("lease", "default/web", api_error(409, "Conflict")),
            RoleguardError::conflict("lease", "default/web")
        );

        let err = map_error("pod", "default/web-0", api_error(403, "Forbidden"));
        assert!(matches!(err, RoleguardError::Api { .. }));
        assert!(err.to_string().contains("Forbidden"));
    }
}
