//! In-process simulated robot for headless runs and CI.
//!
//! [`SimRobot`] keeps a small table-top world: the robot's own pose, lift
//! and head, a set of objects (cubes carry a fiducial marker, props may not)
//! and a set of faces.  Commands sleep for a duration proportional to the
//! motion they describe, scaled by a configurable time scale, then apply
//! their effect to the world.
//!
//! Targeted commands fail the way a real robot would when the target is not
//! in view.  A `go-to-pose` whose destination is occupied fails with
//! `path-blocked`, and any motion longer than ten nominal minutes fails with
//! `timeout` before it starts.  [`SimRobot::set_sensor_outage`] makes
//! `read_state` fail so the degraded-snapshot path can be exercised.
//!
//! # Example
//!
//! ```rust
//! use mindlink_hal::SimRobot;
//! use mindlink_types::Pose;
//!
//! let robot = SimRobot::new("sim-1")
//!     .with_time_scale(0.0)
//!     .with_cube(1, Pose::new(0.0, 200.0, 0.0, 0.0))
//!     .with_face(Some(7), "ada", Pose::new(0.0, 400.0, 100.0, 250.0));
//! assert_eq!(robot.robot_state().robot_id, "sim-1");
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mindlink_types::{
    ActionFailure, BridgeError, Command, EntityDetail, LiftState, LightColor, MarkerId,
    PerceivedEntity, Pose, RobotState, SensorSnapshot,
};
use tracing::{debug, info};

use crate::adapter::RobotAdapter;

/// Nominal travel speed for path-planned moves, mm/s.
const PLANNER_SPEED_MMPS: f32 = 100.0;
/// Nominal turn rate for turns without an explicit speed, deg/s.
const PLANNER_TURN_DPS: f32 = 90.0;
const HEAD_MIN_DEG: f32 = -25.0;
const HEAD_MAX_DEG: f32 = 44.5;
const LIFT_MIN_MM: f32 = 32.0;
const LIFT_MAX_MM: f32 = 92.0;
const LIFT_MIN_DEG: f32 = -11.36;
const LIFT_MAX_DEG: f32 = 45.0;
/// Height of a cube, used when stacking.
const CUBE_HEIGHT_MM: f32 = 44.0;
/// How far in front of the robot a placed cube lands.
const PLACE_OFFSET_MM: f32 = 30.0;
const DOCK_DISTANCE_MM: f32 = 40.0;
/// A `go-to-pose` destination closer than this to a resting object is blocked.
const CLEARANCE_MM: f32 = 35.0;
/// Longest motion the sim will attempt, in nominal seconds.
const MAX_MOTION_SECS: f32 = 600.0;

// ────────────────────────────────────────────────────────────────────────────
// World entities
// ────────────────────────────────────────────────────────────────────────────

/// A simulated object.  `marker` is `None` for props without a fiducial.
#[derive(Debug, Clone, PartialEq)]
pub struct SimObject {
    pub perception_id: u32,
    pub marker: Option<u32>,
    pub pose: Pose,
    pub type_tag: String,
    pub name: String,
    pub liftable: bool,
    pub visible: bool,
    pub color: LightColor,
}

/// A simulated face.  `face_id` is `None` until the face is recognised.
#[derive(Debug, Clone, PartialEq)]
pub struct SimFace {
    pub perception_id: u32,
    pub face_id: Option<u32>,
    pub name: String,
    pub expression: String,
    pub pose: Pose,
    pub visible: bool,
}

#[derive(Debug)]
struct World {
    robot: RobotState,
    objects: Vec<SimObject>,
    faces: Vec<SimFace>,
    backpack: LightColor,
    spoken: Vec<String>,
    next_perception_id: u32,
}

impl World {
    fn next_perception_id(&mut self) -> u32 {
        let id = self.next_perception_id;
        self.next_perception_id += 1;
        id
    }

    fn visible_object(&self, marker: u32) -> Result<&SimObject, ActionFailure> {
        self.objects
            .iter()
            .find(|o| o.visible && o.marker == Some(marker))
            .ok_or_else(|| {
                ActionFailure::new("object-not-visible", format!("object {marker} is not in view"))
            })
    }

    fn visible_face(&self, face: u32) -> Result<&SimFace, ActionFailure> {
        self.faces
            .iter()
            .find(|f| f.visible && f.face_id == Some(face))
            .ok_or_else(|| {
                ActionFailure::new("face-not-visible", format!("face {face} is not in view"))
            })
    }

    fn carried_marker(&self) -> Result<u32, ActionFailure> {
        self.robot
            .carrying_object
            .ok_or_else(|| ActionFailure::new("not-carrying", "the robot is not carrying anything"))
    }

    fn set_lift_ratio(&mut self, ratio: f32) {
        let ratio = ratio.clamp(0.0, 1.0);
        self.robot.lift = LiftState {
            angle_deg: LIFT_MIN_DEG + ratio * (LIFT_MAX_DEG - LIFT_MIN_DEG),
            height_mm: LIFT_MIN_MM + ratio * (LIFT_MAX_MM - LIFT_MIN_MM),
            ratio,
        };
    }

    fn face_point(&mut self, x: f32, y: f32) {
        let dx = x - self.robot.pose.x;
        let dy = y - self.robot.pose.y;
        if dx != 0.0 || dy != 0.0 {
            self.robot.pose.rot = dy.atan2(dx).to_degrees();
        }
    }

    /// Move the robot to `standoff` mm short of `(x, y)`, facing it.
    fn approach(&mut self, x: f32, y: f32, standoff: f32) {
        self.face_point(x, y);
        let heading = self.robot.pose.rot.to_radians();
        self.robot.pose.x = x - standoff * heading.cos();
        self.robot.pose.y = y - standoff * heading.sin();
    }

    /// Fail when a visible object other than the carried one sits at `dest`.
    fn check_clearance(&self, dest: &Pose) -> Result<(), ActionFailure> {
        let carried = self.robot.carrying_object;
        let blocker = self.objects.iter().find(|o| {
            o.visible
                && o.marker.is_none_or(|m| Some(m) != carried)
                && (o.pose.x - dest.x).hypot(o.pose.y - dest.y) < CLEARANCE_MM
        });
        match blocker {
            Some(o) => Err(ActionFailure::new(
                "path-blocked",
                format!("'{}' is in the way at ({:.0}, {:.0})", o.name, o.pose.x, o.pose.y),
            )),
            None => Ok(()),
        }
    }

    fn object_mut(&mut self, marker: u32) -> Option<&mut SimObject> {
        self.objects.iter_mut().find(|o| o.marker == Some(marker))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRobot
// ────────────────────────────────────────────────────────────────────────────

/// A simulated robot implementing [`RobotAdapter`].
///
/// Construct with [`SimRobot::new`] and the `with_*` builders.  A time scale
/// of `0.0` makes every command complete immediately.
#[derive(Debug)]
pub struct SimRobot {
    world: Mutex<World>,
    time_scale: f32,
    read_latency: Duration,
    sensors_offline: AtomicBool,
}

impl SimRobot {
    /// Create a robot at the origin with a full battery and nothing in view.
    pub fn new(robot_id: impl Into<String>) -> Self {
        let mut world = World {
            robot: RobotState {
                robot_id: robot_id.into(),
                battery_voltage: 4.1,
                ..RobotState::default()
            },
            objects: Vec::new(),
            faces: Vec::new(),
            backpack: LightColor::Off,
            spoken: Vec::new(),
            next_perception_id: 1,
        };
        world.set_lift_ratio(0.0);
        Self {
            world: Mutex::new(world),
            time_scale: 1.0,
            read_latency: Duration::ZERO,
            sensors_offline: AtomicBool::new(false),
        }
    }

    /// Multiply every motion duration by `scale`.  Negative values act as `0`.
    pub fn with_time_scale(mut self, scale: f32) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    /// Delay every `read_state` by `latency`.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// Add a visible, liftable light cube with fiducial `marker`.
    pub fn with_cube(self, marker: u32, pose: Pose) -> Self {
        let perception_id = self.world().next_perception_id();
        self.with_object(SimObject {
            perception_id,
            marker: Some(marker),
            pose,
            type_tag: "led-cube".to_string(),
            name: format!("cube-{marker}"),
            liftable: true,
            visible: true,
            color: LightColor::Off,
        })
    }

    /// Add an arbitrary object.
    pub fn with_object(self, object: SimObject) -> Self {
        self.world().objects.push(object);
        self
    }

    /// Add a visible face.  `face_id` of `None` models an unrecognised face.
    pub fn with_face(self, face_id: Option<u32>, name: impl Into<String>, pose: Pose) -> Self {
        {
            let mut world = self.world();
            let perception_id = world.next_perception_id();
            world.faces.push(SimFace {
                perception_id,
                face_id,
                name: name.into(),
                expression: "neutral".to_string(),
                pose,
                visible: true,
            });
        }
        self
    }

    // -----------------------------------------------------------------------
    // World manipulation
    // -----------------------------------------------------------------------

    /// Show or hide the object carrying `marker`.
    ///
    /// An object that comes back into view gets a fresh perception id, the
    /// way a real vision pipeline loses track of it.
    pub fn set_object_visible(&self, marker: u32, visible: bool) {
        let mut world = self.world();
        let fresh = world.next_perception_id();
        if let Some(obj) = world.object_mut(marker) {
            if visible && !obj.visible {
                obj.perception_id = fresh;
            }
            obj.visible = visible;
        }
    }

    /// Teleport the object carrying `marker`.
    pub fn move_object(&self, marker: u32, pose: Pose) {
        if let Some(obj) = self.world().object_mut(marker) {
            obj.pose = pose;
        }
    }

    /// Show or hide the face recognised as `face_id`.
    pub fn set_face_visible(&self, face_id: u32, visible: bool) {
        let mut world = self.world();
        let fresh = world.next_perception_id();
        if let Some(face) = world.faces.iter_mut().find(|f| f.face_id == Some(face_id)) {
            if visible && !face.visible {
                face.perception_id = fresh;
            }
            face.visible = visible;
        }
    }

    /// Make `read_state` fail until cleared.
    pub fn set_sensor_outage(&self, offline: bool) {
        self.sensors_offline.store(offline, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn robot_state(&self) -> RobotState {
        self.world().robot.clone()
    }

    pub fn backpack_color(&self) -> LightColor {
        self.world().backpack
    }

    pub fn object(&self, marker: u32) -> Option<SimObject> {
        self.world()
            .objects
            .iter()
            .find(|o| o.marker == Some(marker))
            .cloned()
    }

    /// Everything passed to `say-text`, oldest first.
    pub fn spoken(&self) -> Vec<String> {
        self.world().spoken.clone()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check preconditions and return the nominal duration in seconds.
    fn plan(&self, command: &Command) -> Result<f32, ActionFailure> {
        let world = self.world();
        let robot = &world.robot.pose;
        let secs = match command {
            Command::DriveForward {
                distance_mm,
                speed_mmps,
            } => distance_mm.abs() / speed_mmps.abs().max(1.0),
            Command::TurnInPlace {
                angle_deg,
                speed_dps,
            } => angle_deg.abs() / speed_dps.abs().max(1.0),
            Command::GoToObject {
                target,
                distance_mm,
            } => {
                let obj = world.visible_object(*target)?;
                (robot.distance_to(&obj.pose) - distance_mm).abs() / PLANNER_SPEED_MMPS
            }
            Command::GoToPose { pose } => {
                world.check_clearance(pose)?;
                robot.distance_to(pose) / PLANNER_SPEED_MMPS
            }
            Command::PickUpObject { target } => {
                let obj = world.visible_object(*target)?;
                if !obj.liftable {
                    return Err(ActionFailure::new(
                        "actuator-error",
                        format!("object {target} cannot be lifted"),
                    ));
                }
                if let Some(held) = world.robot.carrying_object {
                    return Err(ActionFailure::new(
                        "actuator-error",
                        format!("already carrying object {held}"),
                    ));
                }
                2.0 + robot.distance_to(&obj.pose) / PLANNER_SPEED_MMPS
            }
            Command::PlaceObjectDown => {
                world.carried_marker()?;
                1.5
            }
            Command::PlaceObjectOn { target } => {
                let held = world.carried_marker()?;
                if held == *target {
                    return Err(ActionFailure::new(
                        "actuator-error",
                        "cannot place an object on itself",
                    ));
                }
                let obj = world.visible_object(*target)?;
                2.0 + robot.distance_to(&obj.pose) / PLANNER_SPEED_MMPS
            }
            Command::DockWithCube { target, .. } => {
                let obj = world.visible_object(*target)?;
                1.0 + robot.distance_to(&obj.pose) / PLANNER_SPEED_MMPS
            }
            Command::SetHeadAngle { speed_dps, .. } => 30.0 / speed_dps.unwrap_or(100.0).max(1.0),
            Command::SetLiftHeight { speed, .. } => 0.5 / speed.unwrap_or(1.0).max(0.1),
            Command::ChangeBlockColor { target, .. } => {
                let obj = world.visible_object(*target)?;
                if obj.type_tag != "led-cube" {
                    return Err(ActionFailure::new(
                        "actuator-error",
                        format!("object {target} has no lights"),
                    ));
                }
                0.0
            }
            Command::TurnTowardsFace { face } => {
                let f = world.visible_face(*face)?;
                robot.heading_delta(&f.pose).abs() / PLANNER_TURN_DPS
            }
            Command::SayText { text } => 0.05 * text.chars().count() as f32,
            Command::SetBackpackLights { .. } | Command::StopAllMotors => 0.0,
        };
        if !secs.is_finite() || secs > MAX_MOTION_SECS {
            return Err(ActionFailure::new(
                "timeout",
                format!("{} would take {secs:.0}s, limit is {MAX_MOTION_SECS:.0}s", command.name()),
            ));
        }
        Ok(secs)
    }

    /// Apply the end state of `command` to the world.
    fn finish(&self, command: &Command) -> Result<(), ActionFailure> {
        let mut world = self.world();
        match command {
            Command::DriveForward { distance_mm, .. } => {
                let heading = world.robot.pose.rot.to_radians();
                world.robot.pose.x += distance_mm * heading.cos();
                world.robot.pose.y += distance_mm * heading.sin();
            }
            Command::TurnInPlace { angle_deg, .. } => {
                world.robot.pose.rot = (world.robot.pose.rot + angle_deg + 180.0).rem_euclid(360.0) - 180.0;
            }
            Command::GoToObject {
                target,
                distance_mm,
            } => {
                let pose = world.visible_object(*target)?.pose;
                world.approach(pose.x, pose.y, *distance_mm);
            }
            Command::GoToPose { pose } => {
                world.robot.pose.x = pose.x;
                world.robot.pose.y = pose.y;
                world.robot.pose.rot = pose.rot;
            }
            Command::PickUpObject { target } => {
                let pose = world.visible_object(*target)?.pose;
                world.approach(pose.x, pose.y, 0.0);
                world.set_lift_ratio(1.0);
                world.robot.is_carrying_block = true;
                world.robot.carrying_object = Some(*target);
                let lifted = Pose { z: LIFT_MAX_MM, ..world.robot.pose };
                if let Some(obj) = world.object_mut(*target) {
                    obj.pose = lifted;
                }
            }
            Command::PlaceObjectDown => {
                let held = world.carried_marker()?;
                let heading = world.robot.pose.rot.to_radians();
                let placed = Pose {
                    x: world.robot.pose.x + PLACE_OFFSET_MM * heading.cos(),
                    y: world.robot.pose.y + PLACE_OFFSET_MM * heading.sin(),
                    z: 0.0,
                    rot: world.robot.pose.rot,
                };
                world.set_lift_ratio(0.0);
                world.robot.is_carrying_block = false;
                world.robot.carrying_object = None;
                if let Some(obj) = world.object_mut(held) {
                    obj.pose = placed;
                }
            }
            Command::PlaceObjectOn { target } => {
                let held = world.carried_marker()?;
                let base = world.visible_object(*target)?.pose;
                world.approach(base.x, base.y, 0.0);
                world.set_lift_ratio(0.0);
                world.robot.is_carrying_block = false;
                world.robot.carrying_object = None;
                if let Some(obj) = world.object_mut(held) {
                    obj.pose = Pose { z: base.z + CUBE_HEIGHT_MM, ..base };
                }
            }
            Command::DockWithCube {
                target,
                approach_angle_deg,
            } => {
                let pose = world.visible_object(*target)?.pose;
                world.approach(pose.x, pose.y, DOCK_DISTANCE_MM);
                if let Some(angle) = approach_angle_deg {
                    world.robot.pose.rot = *angle;
                }
            }
            Command::SetHeadAngle { angle_deg, .. } => {
                world.robot.head_angle_deg = angle_deg.clamp(HEAD_MIN_DEG, HEAD_MAX_DEG);
            }
            Command::SetLiftHeight { height, .. } => world.set_lift_ratio(*height),
            Command::SetBackpackLights { color } => world.backpack = *color,
            Command::ChangeBlockColor { target, color } => {
                world.visible_object(*target)?;
                if let Some(obj) = world.object_mut(*target) {
                    obj.color = *color;
                }
            }
            Command::SayText { text } => world.spoken.push(text.clone()),
            Command::TurnTowardsFace { face } => {
                let pose = world.visible_face(*face)?.pose;
                world.face_point(pose.x, pose.y);
            }
            Command::StopAllMotors => {}
        }
        Ok(())
    }
}

#[async_trait]
impl RobotAdapter for SimRobot {
    async fn read_state(&self) -> Result<SensorSnapshot, BridgeError> {
        if !self.read_latency.is_zero() {
            tokio::time::sleep(self.read_latency).await;
        }
        if self.sensors_offline.load(Ordering::SeqCst) {
            return Err(BridgeError::SensorUnavailable(
                "simulated sensor link is offline".to_string(),
            ));
        }
        let world = self.world();
        let objects = world.objects.iter().filter(|o| o.visible).map(|o| PerceivedEntity {
            perception_id: o.perception_id,
            marker: o.marker.map(MarkerId::Fiducial),
            pose: o.pose,
            detail: EntityDetail::Object {
                type_tag: o.type_tag.clone(),
                name: o.name.clone(),
                liftable: o.liftable,
                moving: false,
                connected: o.type_tag == "led-cube",
            },
        });
        let faces = world.faces.iter().filter(|f| f.visible).map(|f| PerceivedEntity {
            perception_id: f.perception_id,
            marker: f.face_id.map(MarkerId::Face),
            pose: f.pose,
            detail: EntityDetail::Face {
                name: f.name.clone(),
                expression: f.expression.clone(),
                expression_score: 0.0,
            },
        });
        let entities = objects.chain(faces).collect();
        Ok(SensorSnapshot::new(world.robot.clone(), entities))
    }

    async fn execute(&self, command: &Command) -> Result<(), ActionFailure> {
        let secs = self.plan(command)?;
        debug!(command = command.name(), secs, "sim command planned");
        let scaled = secs * self.time_scale;
        if scaled > 0.0 {
            let wait = Duration::try_from_secs_f32(scaled)
                .map_err(|e| ActionFailure::new("timeout", format!("{}: {e}", command.name())))?;
            tokio::time::sleep(wait).await;
        }
        self.finish(command)?;
        info!(command = command.name(), "sim command finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_robot() -> SimRobot {
        SimRobot::new("test").with_time_scale(0.0)
    }

    #[tokio::test]
    async fn drive_forward_moves_along_heading() {
        let robot = instant_robot();
        robot
            .execute(&Command::DriveForward {
                distance_mm: 50.0,
                speed_mmps: 30.0,
            })
            .await
            .unwrap();
        let state = robot.robot_state();
        assert!((state.pose.x - 50.0).abs() < 1e-3);
        assert!(state.pose.y.abs() < 1e-3);
    }

    #[tokio::test]
    async fn turn_in_place_wraps_heading() {
        let robot = instant_robot();
        robot
            .execute(&Command::TurnInPlace {
                angle_deg: 270.0,
                speed_dps: 90.0,
            })
            .await
            .unwrap();
        assert!((robot.robot_state().pose.rot + 90.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn hidden_target_fails_with_code() {
        let robot = instant_robot().with_cube(3, Pose::new(0.0, 100.0, 0.0, 0.0));
        robot.set_object_visible(3, false);
        let err = robot
            .execute(&Command::GoToObject {
                target: 3,
                distance_mm: 20.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, "object-not-visible");
    }

    #[tokio::test]
    async fn pick_up_then_place_down() {
        let robot = instant_robot().with_cube(1, Pose::new(0.0, 100.0, 0.0, 0.0));
        robot.execute(&Command::PickUpObject { target: 1 }).await.unwrap();
        let state = robot.robot_state();
        assert!(state.is_carrying_block);
        assert_eq!(state.carrying_object, Some(1));
        assert_eq!(state.lift.ratio, 1.0);

        robot.execute(&Command::PlaceObjectDown).await.unwrap();
        assert_eq!(robot.robot_state().carrying_object, None);
        assert_eq!(robot.object(1).unwrap().pose.z, 0.0);

        let err = robot.execute(&Command::PlaceObjectDown).await.unwrap_err();
        assert_eq!(err.code, "not-carrying");
    }

    #[tokio::test]
    async fn stacking_raises_carried_cube() {
        let robot = instant_robot()
            .with_cube(1, Pose::new(0.0, 100.0, 0.0, 0.0))
            .with_cube(2, Pose::new(0.0, 200.0, 50.0, 0.0));
        robot.execute(&Command::PickUpObject { target: 1 }).await.unwrap();
        robot.execute(&Command::PlaceObjectOn { target: 2 }).await.unwrap();
        let placed = robot.object(1).unwrap().pose;
        assert_eq!(placed.z, CUBE_HEIGHT_MM);
        assert_eq!(placed.x, 200.0);
    }

    #[tokio::test]
    async fn snapshot_reports_visible_entities_only() {
        let robot = instant_robot()
            .with_cube(1, Pose::new(0.0, 100.0, 0.0, 0.0))
            .with_cube(2, Pose::new(0.0, 200.0, 0.0, 0.0))
            .with_face(None, "", Pose::new(0.0, 300.0, 0.0, 200.0));
        robot.set_object_visible(2, false);
        let snap = robot.read_state().await.unwrap();
        assert_eq!(snap.object_count, 1);
        assert_eq!(snap.face_count, 1);
        assert_eq!(snap.entities[0].marker, Some(MarkerId::Fiducial(1)));
        assert_eq!(snap.entities[1].marker, None);
    }

    #[tokio::test]
    async fn reappearing_object_gets_new_perception_id() {
        let robot = instant_robot().with_cube(1, Pose::new(0.0, 100.0, 0.0, 0.0));
        let before = robot.read_state().await.unwrap().entities[0].perception_id;
        robot.set_object_visible(1, false);
        robot.set_object_visible(1, true);
        let after = robot.read_state().await.unwrap().entities[0].perception_id;
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn reappearing_face_gets_new_perception_id() {
        let robot = instant_robot().with_face(Some(5), "ada", Pose::new(0.0, 300.0, 0.0, 200.0));
        let before = robot.read_state().await.unwrap().entities[0].perception_id;
        robot.set_face_visible(5, false);
        assert_eq!(robot.read_state().await.unwrap().face_count, 0);
        robot.set_face_visible(5, true);
        let snap = robot.read_state().await.unwrap();
        assert_eq!(snap.entities[0].marker, Some(MarkerId::Face(5)));
        assert_ne!(snap.entities[0].perception_id, before);
    }

    #[tokio::test]
    async fn overlong_motion_times_out_without_moving() {
        let robot = SimRobot::new("test");
        let err = robot
            .execute(&Command::DriveForward {
                distance_mm: 1e30,
                speed_mmps: 1.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, "timeout");
        assert_eq!(robot.robot_state().pose.x, 0.0);
    }

    #[tokio::test]
    async fn occupied_destination_blocks_go_to_pose() {
        let robot = instant_robot().with_cube(1, Pose::new(0.0, 200.0, 0.0, 0.0));
        let err = robot
            .execute(&Command::GoToPose {
                pose: Pose::new(0.0, 210.0, 10.0, 0.0),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, "path-blocked");
        assert_eq!(robot.robot_state().pose.x, 0.0);

        robot
            .execute(&Command::GoToPose {
                pose: Pose::new(0.0, 200.0, 100.0, 0.0),
            })
            .await
            .unwrap();
        assert_eq!(robot.robot_state().pose.y, 100.0);
    }

    #[tokio::test]
    async fn sensor_outage_is_reported() {
        let robot = instant_robot();
        robot.set_sensor_outage(true);
        assert!(matches!(
            robot.read_state().await,
            Err(BridgeError::SensorUnavailable(_))
        ));
        robot.set_sensor_outage(false);
        assert!(robot.read_state().await.is_ok());
    }

    #[tokio::test]
    async fn lights_speech_and_head() {
        let robot = instant_robot()
            .with_cube(4, Pose::new(0.0, 100.0, 0.0, 0.0))
            .with_face(Some(9), "ada", Pose::new(0.0, 0.0, 100.0, 250.0));
        robot
            .execute(&Command::SetBackpackLights {
                color: LightColor::Blue,
            })
            .await
            .unwrap();
        robot
            .execute(&Command::ChangeBlockColor {
                target: 4,
                color: LightColor::Red,
            })
            .await
            .unwrap();
        robot
            .execute(&Command::SayText {
                text: "hello".into(),
            })
            .await
            .unwrap();
        robot
            .execute(&Command::SetHeadAngle {
                angle_deg: 90.0,
                speed_dps: None,
            })
            .await
            .unwrap();
        robot.execute(&Command::TurnTowardsFace { face: 9 }).await.unwrap();

        assert_eq!(robot.backpack_color(), LightColor::Blue);
        assert_eq!(robot.object(4).unwrap().color, LightColor::Red);
        assert_eq!(robot.spoken(), vec!["hello".to_string()]);
        let state = robot.robot_state();
        assert_eq!(state.head_angle_deg, HEAD_MAX_DEG);
        assert!((state.pose.rot - 90.0).abs() < 1e-3);
    }
}
