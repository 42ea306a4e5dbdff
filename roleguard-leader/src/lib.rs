//! # Roleguard Leader
//!
//! Lease-based leader election for a group of replicas.
//!
//! This crate provides functionality for:
//! - Driving a lease through acquisition, renewal and release
//! - Turning lease transitions into election state
//! - Publishing the role as a label on the member's own resource
//! - Exporting a leadership gauge
//!
//! The coordinator is written against the collaborator traits in
//! `roleguard-core`, so the same logic runs against the cluster API or the
//! in-memory collaborators.

pub mod coordinator;
pub mod elector;
pub mod errors;
pub mod metrics;
pub mod reconciler;

pub use coordinator::{CoordinatorConfig, ElectionStats, LeaderCoordinator};
pub use elector::LeaseElector;
pub use errors::{LeaderError, LeaderResult};
pub use metrics::{MetricsReporter, IS_LEADER_METRIC};
pub use reconciler::{ReconcileOutcome, RoleReconciler};
