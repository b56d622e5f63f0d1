//! `mindlink-memory` – The Shared Graph.
//!
//! The fact store the decision engine reasons over and the bridge writes
//! into.  It is an explicitly owned value: whoever holds `&mut WorkingMemory`
//! is the single writer for that synchronization point.
//!
//! # Modules
//!
//! - [`working_memory`] – [`WorkingMemory`][working_memory::WorkingMemory]:
//!   identifier/attribute/value facts split into an input and an output
//!   region, with a transactional [`Batch`][working_memory::Batch] apply so
//!   an update is always a retract and an insert in one step.

pub mod working_memory;

pub use working_memory::{
    Applied, Batch, Fact, FactId, FactTree, MemoryError, NodeId, Region, Value, WorkingMemory,
};
