//! Error types for leader election operations.

use roleguard_core::RoleguardError;
use thiserror::Error;

/// Result type for leader election operations
pub type LeaderResult<T> = Result<T, LeaderError>;

/// Errors that can occur while electing and publishing the leader
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaderError {
    /// A collaborator could not be constructed; the process must exit
    #[error("Fatal startup error: {reason}")]
    FatalStartup { reason: String },

    /// Invalid identity or timing configuration
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// A lease acquisition or renewal attempt failed
    #[error("Lease coordination failed: {reason}")]
    Coordination { reason: String },

    /// The role label write raced with another writer
    #[error("Role label update for {resource} conflicted with a concurrent change")]
    ReconciliationConflict { resource: String },

    /// The resource carrying the role label does not exist
    #[error("Resource {resource} carrying the role label was not found")]
    ReconciliationNotFound { resource: String },

    /// The role label could not be read or written
    #[error("Role label reconciliation for {resource} failed: {reason}")]
    Reconciliation { resource: String, reason: String },

    /// Best-effort demotion during shutdown failed
    #[error("Demotion during shutdown failed: {reason}")]
    ShutdownDemotion { reason: String },

    /// Metrics registration failed
    #[error("Metrics error: {reason}")]
    Metrics { reason: String },
}

impl LeaderError {
    /// Maps a resource API failure onto the reconciliation taxonomy.
    pub fn reconciliation(resource: impl Into<String>, err: RoleguardError) -> Self {
        let resource = resource.into();
        match err {
            RoleguardError::Conflict { .. } => LeaderError::ReconciliationConflict { resource },
            RoleguardError::NotFound { .. } => LeaderError::ReconciliationNotFound { resource },
            other => LeaderError::Reconciliation {
                resource,
                reason: other.to_string(),
            },
        }
    }

    /// Only startup and configuration failures terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LeaderError::FatalStartup { .. } | LeaderError::Config { .. }
        )
    }
}

impl From<RoleguardError> for LeaderError {
    fn from(err: RoleguardError) -> Self {
        match err {
            RoleguardError::Config { message } => LeaderError::Config { reason: message },
            other => LeaderError::Coordination {
                reason: other.to_string(),
            },
        }
    }
}

impl From<prometheus::Error> for LeaderError {
    fn from(err: prometheus::Error) -> Self {
        LeaderError::Metrics {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciliation_mapping() {
        let conflict =
            LeaderError::reconciliation("default/pod-1", RoleguardError::conflict("pod", "pod-1"));
        assert_eq!(
            conflict,
            LeaderError::ReconciliationConflict {
                resource: "default/pod-1".to_string()
            }
        );

        let missing =
            LeaderError::reconciliation("default/pod-1", RoleguardError::not_found("pod", "pod-1"));
        assert!(matches!(missing, LeaderError::ReconciliationNotFound { .. }));

        let api = LeaderError::reconciliation("default/pod-1", RoleguardError::api("refused"));
        assert!(matches!(api, LeaderError::Reconciliation { .. }));
        assert!(!api.is_fatal());
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err: LeaderError = RoleguardError::config("bad timings").into();
        assert!(err.is_fatal());

        let err: LeaderError = RoleguardError::timeout("renew").into();
        assert!(matches!(err, LeaderError::Coordination { .. }));
        assert!(!err.is_fatal());
    }
}
