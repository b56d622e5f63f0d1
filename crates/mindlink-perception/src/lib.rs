//! `mindlink-perception` – From Sensor Stream to Stable Identities
//!
//! Turns the robot's raw, identity-less perception stream into the
//! per-entity decisions the graph writer applies before every cycle.
//!
//! # Modules
//!
//! - [`snapshot`] – [`SnapshotReader`][snapshot::SnapshotReader]: bounded,
//!   never-failing sensor read that degrades to "nothing visible".
//! - [`reconcile`] – [`IdentityReconciler`][reconcile::IdentityReconciler]:
//!   matches visible entities against remembered ones by durable marker id
//!   and decides create / update / no-op.

pub mod reconcile;
pub mod snapshot;

pub use reconcile::{Decision, IdentityReconciler, Reconciliation};
pub use snapshot::SnapshotReader;
