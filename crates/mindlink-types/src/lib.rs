//! `mindlink-types` – shared vocabulary for the perception/action bridge.
//!
//! Every crate in the workspace speaks in these types: sensor snapshots and
//! perceived entities flow in from the robot, the closed [`Command`] set
//! flows out to it, and [`BridgeError`] classifies everything that can go
//! wrong in between.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// Position and heading relative to the fixed origin captured at process
/// start.  Shared by the robot pose, entity poses and pose-target commands.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Heading around the vertical axis (degrees).
    pub rot: f32,
    /// X position (mm).
    pub x: f32,
    /// Y position (mm).
    pub y: f32,
    /// Z position (mm).
    pub z: f32,
}

impl Pose {
    pub fn new(rot: f32, x: f32, y: f32, z: f32) -> Self {
        Self { rot, x, y, z }
    }

    /// Euclidean distance between the two positions (mm), ignoring heading.
    pub fn distance_to(&self, other: &Pose) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Smallest absolute heading difference in degrees, in `[0, 180]`.
    pub fn heading_delta(&self, other: &Pose) -> f32 {
        let d = (self.rot - other.rot).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    /// `true` when both position and heading agree within the tolerances.
    pub fn within(&self, other: &Pose, position_epsilon: f32, rotation_epsilon: f32) -> bool {
        self.distance_to(other) <= position_epsilon
            && self.heading_delta(other) <= rotation_epsilon
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Perception
// ────────────────────────────────────────────────────────────────────────────

/// A durable identifier tied to a physical or visual marker.
///
/// Unlike the transient perception id, a marker id survives the entity
/// leaving the field of view and coming back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerId {
    /// Fiducial pattern printed on a cube or custom object.
    Fiducial(u32),
    /// Identity assigned by face recognition to an enrolled face.
    Face(u32),
}

impl MarkerId {
    /// The numeric id written to the graph as `marker-id`.
    pub fn value(&self) -> u32 {
        match self {
            MarkerId::Fiducial(v) | MarkerId::Face(v) => *v,
        }
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerId::Fiducial(v) => write!(f, "fiducial:{v}"),
            MarkerId::Face(v) => write!(f, "face:{v}"),
        }
    }
}

/// Type-specific fields of a perceived entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EntityDetail {
    Object {
        /// Object family, e.g. `"led-cube"`, `"wall"`, `"box"`.
        type_tag: String,
        name: String,
        liftable: bool,
        moving: bool,
        connected: bool,
    },
    Face {
        /// Empty when the face has not been enrolled.
        name: String,
        expression: String,
        expression_score: f32,
    },
}

/// A sensor-reported object or face visible in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceivedEntity {
    /// Valid only while the entity stays continuously visible.
    pub perception_id: u32,
    pub marker: Option<MarkerId>,
    pub pose: Pose,
    pub detail: EntityDetail,
}

impl PerceivedEntity {
    pub fn is_face(&self) -> bool {
        matches!(self.detail, EntityDetail::Face { .. })
    }
}

/// Lift mechanism state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LiftState {
    pub angle_deg: f32,
    pub height_mm: f32,
    /// 0.0 fully lowered, 1.0 fully raised.
    pub ratio: f32,
}

/// Scalar robot state mirrored onto the graph every cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotState {
    pub robot_id: String,
    pub pose: Pose,
    pub battery_voltage: f32,
    pub is_charging: bool,
    pub cliff_detected: bool,
    pub picked_up: bool,
    pub head_angle_deg: f32,
    pub lift: LiftState,
    pub is_carrying_block: bool,
    pub carrying_object: Option<u32>,
}

/// One atomic view of the robot and everything it can currently see.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub robot: RobotState,
    pub entities: Vec<PerceivedEntity>,
    pub object_count: usize,
    pub face_count: usize,
    /// `true` when the sensor layer failed and `robot` is a stale copy.
    pub degraded: bool,
}

impl SensorSnapshot {
    pub fn new(robot: RobotState, entities: Vec<PerceivedEntity>) -> Self {
        let face_count = entities.iter().filter(|e| e.is_face()).count();
        Self {
            robot,
            object_count: entities.len() - face_count,
            face_count,
            entities,
            degraded: false,
        }
    }

    /// A snapshot that keeps the previous scalar reading and sees nothing.
    pub fn degraded(previous: RobotState) -> Self {
        Self {
            robot: previous,
            entities: Vec::new(),
            object_count: 0,
            face_count: 0,
            degraded: true,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Commands
// ────────────────────────────────────────────────────────────────────────────

/// Colours accepted by the backpack and cube light commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightColor {
    Red,
    Green,
    Blue,
    White,
    Off,
}

impl LightColor {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Some(LightColor::Red),
            "green" => Some(LightColor::Green),
            "blue" => Some(LightColor::Blue),
            "white" => Some(LightColor::White),
            "off" => Some(LightColor::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LightColor::Red => "red",
            LightColor::Green => "green",
            LightColor::Blue => "blue",
            LightColor::White => "white",
            LightColor::Off => "off",
        }
    }
}

/// Whether a command may overlap other in-flight commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyClass {
    /// Serialized against every other exclusive command, FIFO.
    Exclusive,
    /// Runs alongside anything else.
    ConcurrentSafe,
}

/// The closed set of actuator commands the bridge can dispatch.
///
/// Target ids (`target`, `face`) are durable marker ids as written to the
/// graph under `marker-id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "kebab-case")]
pub enum Command {
    DriveForward { distance_mm: f32, speed_mmps: f32 },
    TurnInPlace { angle_deg: f32, speed_dps: f32 },
    GoToObject { target: u32, distance_mm: f32 },
    GoToPose { pose: Pose },
    PickUpObject { target: u32 },
    PlaceObjectDown,
    PlaceObjectOn { target: u32 },
    DockWithCube { target: u32, approach_angle_deg: Option<f32> },
    SetHeadAngle { angle_deg: f32, speed_dps: Option<f32> },
    SetLiftHeight { height: f32, speed: Option<f32> },
    SetBackpackLights { color: LightColor },
    ChangeBlockColor { target: u32, color: LightColor },
    SayText { text: String },
    TurnTowardsFace { face: u32 },
    StopAllMotors,
}

impl Command {
    /// Canonical graph name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::DriveForward { .. } => "drive-forward",
            Command::TurnInPlace { .. } => "turn-in-place",
            Command::GoToObject { .. } => "go-to-object",
            Command::GoToPose { .. } => "go-to-pose",
            Command::PickUpObject { .. } => "pick-up-object",
            Command::PlaceObjectDown => "place-object-down",
            Command::PlaceObjectOn { .. } => "place-object-on",
            Command::DockWithCube { .. } => "dock-with-cube",
            Command::SetHeadAngle { .. } => "set-head-angle",
            Command::SetLiftHeight { .. } => "set-lift-height",
            Command::SetBackpackLights { .. } => "set-backpack-lights",
            Command::ChangeBlockColor { .. } => "change-block-color",
            Command::SayText { .. } => "say-text",
            Command::TurnTowardsFace { .. } => "turn-towards-face",
            Command::StopAllMotors => "stop-all-motors",
        }
    }

    /// Concurrency class of this command.
    ///
    /// `parallel_hint` only matters for head and lift moves; body motion is
    /// always exclusive and lights/speech never are.
    pub fn concurrency(&self, parallel_hint: bool) -> ConcurrencyClass {
        match self {
            Command::DriveForward { .. }
            | Command::TurnInPlace { .. }
            | Command::GoToObject { .. }
            | Command::GoToPose { .. }
            | Command::PickUpObject { .. }
            | Command::PlaceObjectDown
            | Command::PlaceObjectOn { .. }
            | Command::DockWithCube { .. }
            | Command::TurnTowardsFace { .. } => ConcurrencyClass::Exclusive,
            Command::SetHeadAngle { .. } | Command::SetLiftHeight { .. } => {
                if parallel_hint {
                    ConcurrencyClass::ConcurrentSafe
                } else {
                    ConcurrencyClass::Exclusive
                }
            }
            Command::SetBackpackLights { .. }
            | Command::ChangeBlockColor { .. }
            | Command::SayText { .. }
            | Command::StopAllMotors => ConcurrencyClass::ConcurrentSafe,
        }
    }
}

/// A typed, recoverable actuator-layer failure.
///
/// `code` is a short kebab-case tag written to the graph as `failure-code`;
/// `reason` is the human-readable `failure-reason`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {reason}")]
pub struct ActionFailure {
    pub code: String,
    pub reason: String,
}

impl ActionFailure {
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// Lifecycle marker values written to a request's `status` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Complete,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Running => "running",
            ActionStatus::Complete => "complete",
            ActionStatus::Failed => "failed",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the observer bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"mindlink-runtime::coordinator"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the observer bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Telemetry(TelemetryData),
    /// A request changed lifecycle state.
    ActionStatus {
        request: u64,
        command: String,
        status: ActionStatus,
        failure: Option<ActionFailure>,
    },
    SensorDegraded(String),
    IdentityAnomaly { marker: MarkerId, details: String },
}

/// Per-cycle bridge summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryData {
    pub cycle: u64,
    pub pose: Pose,
    pub battery_voltage: f32,
    pub visible_objects: usize,
    pub visible_faces: usize,
    pub remembered: usize,
    pub actions_in_flight: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for the bridge.
///
/// Only [`BridgeError::Protocol`] is fatal; everything else is reported and
/// the cycle loop carries on.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Malformed action request '{command}': {details}")]
    MalformedRequest { command: String, details: String },

    #[error("Actuator failure: {0}")]
    Actuator(ActionFailure),

    #[error("Identity anomaly on {marker}: {details}")]
    IdentityAnomaly { marker: MarkerId, details: String },

    #[error("Decision engine protocol violation: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Protocol(_))
    }
}

impl From<ActionFailure> for BridgeError {
    fn from(failure: ActionFailure) -> Self {
        BridgeError::Actuator(failure)
    }
}
