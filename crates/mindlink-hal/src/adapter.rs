//! The robot capability surface.
//!
//! The bridge never talks to a robot SDK directly.  A driver implements
//! [`RobotAdapter`] and the rest of the workspace only ever sees
//! [`SensorSnapshot`]s coming in and [`Command`]s going out.

use async_trait::async_trait;
use mindlink_types::{ActionFailure, BridgeError, Command, SensorSnapshot};

/// Every robot driver must implement this trait.
///
/// # Contract
///
/// * `read_state` – returns one consistent view of the robot's scalar state
///   and every entity currently in sensing range.  Failures are reported as
///   [`BridgeError::SensorUnavailable`]; callers bound the call with a
///   timeout and never treat it as fatal.
///
/// * `execute` – runs one command to completion.  It may take as long as the
///   motion takes.  A recoverable condition (target lost, path blocked…) is
///   reported as an [`ActionFailure`] whose `code` ends up in the graph.
#[async_trait]
pub trait RobotAdapter: Send + Sync {
    /// Read the current robot state and visible entities.
    async fn read_state(&self) -> Result<SensorSnapshot, BridgeError>;

    /// Run `command` until it completes or fails.
    async fn execute(&self, command: &Command) -> Result<(), ActionFailure>;
}
