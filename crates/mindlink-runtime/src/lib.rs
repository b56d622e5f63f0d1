//! `mindlink-runtime` – The Cycle Owner
//!
//! Owns the shared graph and the decision cycle boundary.  Everything the
//! bridge does happens inside a synchronisation point opened by the
//! [`CycleCoordinator`]; the engine never sees the graph mid-write.
//!
//! # Modules
//!
//! - [`coordinator`] – [`CycleCoordinator`][coordinator::CycleCoordinator]:
//!   sequences snapshot → reconcile → write before each decision cycle, and
//!   watch → dispatch → write-back after it.  Also defines the
//!   [`DecisionEngine`][coordinator::DecisionEngine] seam.
//! - [`config`] – [`BridgeConfig`][config::BridgeConfig]: timing, tolerance
//!   and concurrency knobs.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod config;
pub mod coordinator;
pub mod telemetry;

pub use config::BridgeConfig;
pub use coordinator::{CycleCoordinator, CycleReport, DecisionEngine};
pub use telemetry::{TracerProviderGuard, init_tracing};
