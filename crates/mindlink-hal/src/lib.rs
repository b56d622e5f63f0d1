//! `mindlink-hal` – The Robot Boundary
//!
//! Everything the bridge knows about the physical agent goes through the
//! [`RobotAdapter`] capability surface: one atomic state read and one call
//! per recognised [`Command`][mindlink_types::Command].
//!
//! # Modules
//!
//! - [`adapter`] – the async [`RobotAdapter`] trait.
//! - [`sim`] – [`SimRobot`], an in-process world used for headless runs and
//!   tests.

pub mod adapter;
pub mod sim;

pub use adapter::RobotAdapter;
pub use sim::{SimFace, SimObject, SimRobot};
