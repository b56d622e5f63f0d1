//! `mindlink-kernel` – Synchronisation Core
//!
//! The part of the bridge that touches the shared graph.  It does not
//! reason; it keeps the graph and the robot consistent with each other.
//!
//! # Modules
//!
//! - [`graph_writer`] – [`GraphWriter`][graph_writer::GraphWriter]: applies
//!   reconciliation decisions and scalar robot state to the input link in a
//!   single batch per cycle.
//! - [`command_table`] – the closed vocabulary of action requests, aliases
//!   included, and parameter validation.
//! - [`action_watcher`] – [`ActionWatcher`][action_watcher::ActionWatcher]:
//!   finds newly appeared requests on the output link and notices retracted
//!   ones.
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: runs requests
//!   against the robot with exclusive / concurrent-safe scheduling and writes
//!   `status` markers back exactly once per transition.

pub mod action_watcher;
pub mod command_table;
pub mod dispatcher;
pub mod graph_writer;

pub use action_watcher::{ActionWatcher, Detected, Scan};
pub use command_table::{CommandKind, ParsedRequest};
pub use dispatcher::{Dispatcher, LifecycleState, Transition};
pub use graph_writer::{GraphWriter, WriteSummary};
