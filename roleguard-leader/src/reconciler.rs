//! Keeps a member's role label in line with its election state.

use roleguard_core::{ResourceApi, ResourceRef, Role, ROLE_LABEL_KEY};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{LeaderError, LeaderResult};

/// Result of a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The label already had the desired value; nothing was written
    Unchanged,

    /// The label was written
    Updated,
}

/// Reconciles the role label on a single resource.
///
/// Each call is one read and at most one conditional write. A lost race
/// surfaces as [`LeaderError::ReconciliationConflict`] and is left for the
/// caller's next attempt; there is no retry loop in here.
pub struct RoleReconciler {
    api: Arc<dyn ResourceApi>,
    label_key: String,
}

impl RoleReconciler {
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self::with_label_key(api, ROLE_LABEL_KEY)
    }

    pub fn with_label_key(api: Arc<dyn ResourceApi>, label_key: impl Into<String>) -> Self {
        Self {
            api,
            label_key: label_key.into(),
        }
    }

    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Ensures the role label on `resource` matches `role`.
    pub async fn set_role(
        &self,
        resource: &ResourceRef,
        role: Role,
    ) -> LeaderResult<ReconcileOutcome> {
        let desired = role.label_value();

        let mut current = self
            .api
            .get(resource)
            .await
            .map_err(|e| LeaderError::reconciliation(resource.to_string(), e))?;

        if current.label(&self.label_key) == Some(desired) {
            debug!(resource = %resource, label = %self.label_key, value = desired, "Role label already up to date");
            return Ok(ReconcileOutcome::Unchanged);
        }

        current.set_label(self.label_key.as_str(), desired);

        self.api
            .update(&current)
            .await
            .map_err(|e| LeaderError::reconciliation(resource.to_string(), e))?;

        info!(resource = %resource, label = %self.label_key, value = desired, "Successfully set role label");
        Ok(ReconcileOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roleguard_core::memory::InMemoryResourceApi;
    use roleguard_core::Labels;

    fn pod() -> ResourceRef {
        ResourceRef::new("default", "pod-1")
    }

    fn reconciler_with(api: &InMemoryResourceApi) -> RoleReconciler {
        RoleReconciler::new(Arc::new(api.clone()))
    }

    #[tokio::test]
    async fn test_set_role_is_idempotent() {
        let api = InMemoryResourceApi::new();
        api.insert(pod(), Some(Labels::new()));
        let reconciler = reconciler_with(&api);

        let first = reconciler.set_role(&pod(), Role::Leader).await.unwrap();
        let second = reconciler.set_role(&pod(), Role::Leader).await.unwrap();

        assert_eq!(first, ReconcileOutcome::Updated);
        assert_eq!(second, ReconcileOutcome::Unchanged);
        assert_eq!(api.write_count(&pod()), 1);
        assert_eq!(api.label(&pod(), ROLE_LABEL_KEY).as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_set_role_initialises_missing_label_map() {
        let api = InMemoryResourceApi::new();
        api.insert(pod(), None);
        let reconciler = reconciler_with(&api);

        reconciler.set_role(&pod(), Role::Follower).await.unwrap();
        assert_eq!(api.label(&pod(), ROLE_LABEL_KEY).as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn test_set_role_preserves_other_labels() {
        let api = InMemoryResourceApi::new();
        let mut labels = Labels::new();
        labels.insert("app".to_string(), "web".to_string());
        labels.insert(ROLE_LABEL_KEY.to_string(), "false".to_string());
        api.insert(pod(), Some(labels));

        reconciler_with(&api)
            .set_role(&pod(), Role::Leader)
            .await
            .unwrap();

        let labels = api.labels(&pod()).unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(labels.get(ROLE_LABEL_KEY).map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_conflict_is_reported_without_retry() {
        let api = InMemoryResourceApi::new();
        api.insert(pod(), Some(Labels::new()));
        api.inject_conflicts(1);
        let reconciler = reconciler_with(&api);

        let err = reconciler.set_role(&pod(), Role::Leader).await.unwrap_err();
        assert!(matches!(err, LeaderError::ReconciliationConflict { .. }));
        assert_eq!(api.write_count(&pod()), 0);

        // The next attempt heals it.
        let outcome = reconciler.set_role(&pod(), Role::Leader).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated);
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let api = InMemoryResourceApi::new();
        let err = reconciler_with(&api)
            .set_role(&pod(), Role::Leader)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LeaderError::ReconciliationNotFound {
                resource: "default/pod-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_custom_label_key() {
        let api = InMemoryResourceApi::new();
        api.insert(pod(), None);
        let reconciler = RoleReconciler::with_label_key(Arc::new(api.clone()), "role-active");

        reconciler.set_role(&pod(), Role::Leader).await.unwrap();
        assert_eq!(api.label(&pod(), "role-active").as_deref(), Some("true"));
        assert_eq!(reconciler.label_key(), "role-active");
    }
}
