//! # Error Types
//!
//! Errors reported by the collaborators of the election coordinator: the
//! resource API that carries the role label and the store that holds the
//! lease.

use thiserror::Error;

/// Error types that can occur while talking to external collaborators.
///
/// Every variant carries enough context (resource kind and name, or a
/// message from the remote side) to be logged without further lookups.
///
/// # Error Categories
///
/// - **Not found**: the referenced resource or lease does not exist
/// - **Conflict**: an optimistic-concurrency precondition failed
/// - **Api**: the remote service rejected the request or was unreachable
/// - **Config**: invalid identity or timing configuration
/// - **Timeout**: an operation exceeded its time budget
///
/// # Examples
///
/// ```rust
/// use roleguard_core::RoleguardError;
///
/// let error = RoleguardError::conflict("pod", "web-0");
/// assert!(error.is_conflict());
/// assert!(error.is_retryable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoleguardError {
    /// Referenced object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Write rejected because the object changed since it was read
    #[error("Conflict updating {kind} {name}: object was modified concurrently")]
    Conflict { kind: String, name: String },

    /// Remote API failure other than not-found or conflict
    #[error("API error: {message}")]
    Api { message: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Operation exceeded its timeout limit
    #[error("Timeout occurred: {operation}")]
    Timeout { operation: String },

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results returned by collaborator traits.
pub type Result<T> = std::result::Result<T, RoleguardError>;

impl RoleguardError {
    /// Creates a not-found error for the given object.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates an optimistic-concurrency conflict for the given object.
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a new API error with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use roleguard_core::RoleguardError;
    ///
    /// let error = RoleguardError::api("connection refused");
    /// assert_eq!(error.to_string(), "API error: connection refused");
    /// ```
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Creates a new configuration error with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new timeout error naming the operation that timed out.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Determines if this error condition may clear up on a later attempt.
    ///
    /// Conflicts, API failures and timeouts are transient. A missing object
    /// or a bad configuration will not fix itself by retrying.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use roleguard_core::RoleguardError;
    ///
    /// assert!(RoleguardError::timeout("get lease").is_retryable());
    /// assert!(!RoleguardError::not_found("pod", "web-0").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Api { .. } | Self::Timeout { .. }
        )
    }
}
