//! [`SnapshotReader`] – one bounded sensor read per cycle.
//!
//! The reader wraps a [`RobotAdapter`] and guarantees two things to the
//! cycle coordinator: the call returns within the configured timeout, and it
//! never returns an error.  When the robot cannot be read the previous
//! scalar state is repeated and no entity is reported visible.

use std::sync::Arc;
use std::time::Duration;

use mindlink_hal::RobotAdapter;
use mindlink_types::{BridgeError, RobotState, SensorSnapshot};
use tracing::{debug, warn};

/// Bounded, infallible reader in front of the robot's state call.
pub struct SnapshotReader {
    robot: Arc<dyn RobotAdapter>,
    timeout: Duration,
    last: RobotState,
    fault: Option<BridgeError>,
    consecutive_failures: u32,
}

impl SnapshotReader {
    pub fn new(robot: Arc<dyn RobotAdapter>, timeout: Duration) -> Self {
        Self {
            robot,
            timeout,
            last: RobotState::default(),
            fault: None,
            consecutive_failures: 0,
        }
    }

    /// Pull one snapshot.
    ///
    /// On a sensor error or a timeout the returned snapshot is
    /// [`SensorSnapshot::degraded`] and [`SnapshotReader::last_fault`]
    /// describes why.
    pub async fn read(&mut self) -> SensorSnapshot {
        let fault = match tokio::time::timeout(self.timeout, self.robot.read_state()).await {
            Ok(Ok(snapshot)) => {
                if self.consecutive_failures > 0 {
                    debug!(
                        after = self.consecutive_failures,
                        "sensor link recovered"
                    );
                }
                self.last = snapshot.robot.clone();
                self.fault = None;
                self.consecutive_failures = 0;
                return snapshot;
            }
            Ok(Err(err)) => err,
            Err(_) => BridgeError::SensorUnavailable(format!(
                "no sensor reading within {} ms",
                self.timeout.as_millis()
            )),
        };
        self.consecutive_failures += 1;
        warn!(
            error = %fault,
            consecutive = self.consecutive_failures,
            "sensor snapshot degraded"
        );
        self.fault = Some(fault);
        SensorSnapshot::degraded(self.last.clone())
    }

    /// Why the most recent read degraded, if it did.
    pub fn last_fault(&self) -> Option<&BridgeError> {
        self.fault.as_ref()
    }

    /// Robot state of the last successful read.
    pub fn last_state(&self) -> &RobotState {
        &self.last
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindlink_hal::SimRobot;
    use mindlink_types::{ActionFailure, Command, Pose};

    /// A robot whose state call never returns.
    struct StalledRobot;

    #[async_trait::async_trait]
    impl RobotAdapter for StalledRobot {
        async fn read_state(&self) -> Result<SensorSnapshot, BridgeError> {
            std::future::pending().await
        }

        async fn execute(&self, _command: &Command) -> Result<(), ActionFailure> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn healthy_read_passes_through() {
        let robot = Arc::new(
            SimRobot::new("r").with_cube(2, Pose::new(0.0, 10.0, 20.0, 0.0)),
        );
        let mut reader = SnapshotReader::new(robot, Duration::from_millis(100));
        let snap = reader.read().await;
        assert!(!snap.degraded);
        assert_eq!(snap.object_count, 1);
        assert!(reader.last_fault().is_none());
        assert_eq!(reader.last_state().robot_id, "r");
    }

    #[tokio::test]
    async fn sensor_error_keeps_previous_scalars() {
        let robot = Arc::new(SimRobot::new("r").with_cube(2, Pose::default()));
        let mut reader = SnapshotReader::new(robot.clone(), Duration::from_millis(100));
        let good = reader.read().await;

        robot.set_sensor_outage(true);
        let snap = reader.read().await;
        assert!(snap.degraded);
        assert!(snap.entities.is_empty());
        assert_eq!(snap.robot, good.robot);
        assert!(matches!(
            reader.last_fault(),
            Some(BridgeError::SensorUnavailable(_))
        ));
        assert_eq!(reader.consecutive_failures(), 1);

        robot.set_sensor_outage(false);
        assert!(!reader.read().await.degraded);
        assert_eq!(reader.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn stalled_read_times_out() {
        let mut reader = SnapshotReader::new(Arc::new(StalledRobot), Duration::from_millis(20));
        let snap = reader.read().await;
        assert!(snap.degraded);
        assert_eq!(snap.object_count, 0);
        assert!(reader.last_fault().is_some());
    }

    #[tokio::test]
    async fn slow_sim_read_degrades_until_within_budget() {
        let robot = Arc::new(
            SimRobot::new("slow")
                .with_read_latency(Duration::from_millis(80))
                .with_cube(1, Pose::default()),
        );
        let mut reader = SnapshotReader::new(robot, Duration::from_millis(10));
        let snap = reader.read().await;
        assert!(snap.degraded);
        assert!(snap.entities.is_empty());
        match reader.last_fault() {
            Some(BridgeError::SensorUnavailable(reason)) => assert!(reason.contains("10 ms")),
            other => panic!("expected a timeout fault, got {other:?}"),
        }

        let mut patient = SnapshotReader::new(
            Arc::new(SimRobot::new("slow").with_read_latency(Duration::from_millis(5))),
            Duration::from_millis(500),
        );
        assert!(!patient.read().await.degraded);
    }
}
