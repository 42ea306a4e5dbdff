//! The resource API consumed by the role reconciler.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::{ResourceRef, Result};

/// Label map of a resource.
pub type Labels = BTreeMap<String, String>;

/// Snapshot of a labelled resource as read from the resource API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub reference: ResourceRef,

    /// `None` when the resource has no label map at all
    pub labels: Option<Labels>,

    /// Opaque version used as the optimistic-concurrency precondition
    pub version: String,
}

impl Resource {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.as_ref()?.get(key).map(String::as_str)
    }

    /// Sets a label, creating the label map if it is missing.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels
            .get_or_insert_with(Labels::new)
            .insert(key.into(), value.into());
    }
}

/// Read and conditionally write a resource's labels.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Reads the resource, failing with `NotFound` when it does not exist.
    async fn get(&self, reference: &ResourceRef) -> Result<Resource>;

    /// Writes the labels back, failing with `Conflict` when the stored
    /// version no longer matches `resource.version`.
    async fn update(&self, resource: &Resource) -> Result<Resource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_label_initialises_missing_map() {
        let mut resource = Resource {
            reference: ResourceRef::new("default", "pod-1"),
            labels: None,
            version: "1".to_string(),
        };

        assert_eq!(resource.label("role"), None);
        resource.set_label("role", "true");
        assert_eq!(resource.label("role"), Some("true"));
    }
}
