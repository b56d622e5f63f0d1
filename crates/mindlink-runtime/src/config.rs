//! [`BridgeConfig`] – runtime knobs for the coordinator.

use std::time::Duration;

/// Timing, tolerance and concurrency settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Wall-clock period between decision cycles in autonomous mode.
    pub cycle_period: Duration,
    /// Upper bound on one sensor read.
    pub snapshot_timeout: Duration,
    /// Concurrent-safe commands allowed in flight at once.
    pub max_concurrent_actions: usize,
    /// Pose distance (mm) under which a remembered entity is unchanged.
    pub position_epsilon_mm: f32,
    /// Heading difference (degrees) under which a remembered entity is
    /// unchanged.
    pub rotation_epsilon_deg: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cycle_period: Duration::from_millis(100),
            snapshot_timeout: Duration::from_millis(250),
            max_concurrent_actions: 4,
            position_epsilon_mm: 1.0,
            rotation_epsilon_deg: 1.0,
        }
    }
}
