//! # Roleguard Core
//!
//! Shared building blocks for lease-based role election:
//!
//! - **Identity**: [`MemberIdentity`] scoping every lease and label operation
//! - **Timings**: [`ElectionTimings`] with ordering validation
//! - **State**: [`ElectionState`] and the published [`Role`]
//! - **Collaborators**: the [`ResourceApi`], [`LeaseStore`] and
//!   [`LeaseClient`] traits the coordinator is written against
//! - **In-memory collaborators**: [`memory`] implementations for tests and
//!   local runs
//! - **Error Handling**: [`RoleguardError`]
//!
//! ```rust
//! use roleguard_core::{ElectionConfig, ElectionTimings, MemberIdentity};
//!
//! let identity = MemberIdentity::new("m1", "payments", "default", "payments-0")?;
//! let config = ElectionConfig::new(identity, ElectionTimings::default())?;
//! assert_eq!(config.identity.lease_ref().name, "payments");
//! # Ok::<(), roleguard_core::RoleguardError>(())
//! ```

pub mod config;
pub mod error;
pub mod lease;
pub mod memory;
pub mod resource;
pub mod types;

pub use config::{ElectionConfig, ElectionTimings};
pub use error::*;
pub use lease::{LeaseCallbacks, LeaseClient, LeaseRecord, LeaseStore, VersionedLease};
pub use resource::{Labels, Resource, ResourceApi};
pub use types::*;
