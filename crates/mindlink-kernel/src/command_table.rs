//! The recognised command vocabulary.
//!
//! Request names are resolved through [`COMMAND_TABLE`] into a
//! [`CommandKind`], and every kind has exactly one builder arm in
//! [`parse_request`] that reads its parameters off the request identifier.
//! Adding a command means adding a `CommandKind` variant; the compiler then
//! points at every place that has to learn about it.
//!
//! | Name (aliases) | Parameters |
//! |---|---|
//! | `drive-forward` | `distance`, `speed` |
//! | `turn-in-place` | `angle`, `speed` |
//! | `go-to-object` | `target-id`/`object-id`, `distance` |
//! | `go-to-pose` | `x`, `y`, `rot`? |
//! | `pick-up-object` | `object-id`/`target-id` |
//! | `place-object-down` | |
//! | `place-object-on` (`place-on-object`) | `target-id`/`object-id` |
//! | `dock-with-cube` | `target-id`/`object-id`, `approach-angle`? |
//! | `set-head-angle` (`move-head`) | `angle`, `speed`? |
//! | `set-lift-height` (`move-lift`) | `height`, `speed`? |
//! | `set-backpack-lights` | `color` |
//! | `change-block-color` | `object-id`/`target-id`, `color` |
//! | `say-text` | `text` |
//! | `turn-towards-face` (`turn-to-face`) | `face-id` |
//! | `stop-all-motors` | |
//!
//! Any request may carry `parallel 1` to ask for concurrent execution; only
//! head and lift moves honour it.

use mindlink_memory::{NodeId, Value, WorkingMemory};
use mindlink_types::{ActionFailure, Command, LightColor, Pose};

/// Attributes the bridge itself writes onto a request.
pub const STATUS_ATTR: &str = "status";
pub const COMPLETED_ATTR: &str = "completed";
pub const FAILURE_CODE_ATTR: &str = "failure-code";
pub const FAILURE_REASON_ATTR: &str = "failure-reason";
pub const PARALLEL_ATTR: &str = "parallel";

const TARGET_ATTRS: &[&str] = &["target-id", "object-id"];

/// Closed set of recognised request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    DriveForward,
    TurnInPlace,
    GoToObject,
    GoToPose,
    PickUpObject,
    PlaceObjectDown,
    PlaceObjectOn,
    DockWithCube,
    SetHeadAngle,
    SetLiftHeight,
    SetBackpackLights,
    ChangeBlockColor,
    SayText,
    TurnTowardsFace,
    StopAllMotors,
}

/// Request name → kind, canonical names first, then aliases.
pub const COMMAND_TABLE: &[(&str, CommandKind)] = &[
    ("drive-forward", CommandKind::DriveForward),
    ("turn-in-place", CommandKind::TurnInPlace),
    ("go-to-object", CommandKind::GoToObject),
    ("go-to-pose", CommandKind::GoToPose),
    ("pick-up-object", CommandKind::PickUpObject),
    ("place-object-down", CommandKind::PlaceObjectDown),
    ("place-object-on", CommandKind::PlaceObjectOn),
    ("dock-with-cube", CommandKind::DockWithCube),
    ("set-head-angle", CommandKind::SetHeadAngle),
    ("set-lift-height", CommandKind::SetLiftHeight),
    ("set-backpack-lights", CommandKind::SetBackpackLights),
    ("change-block-color", CommandKind::ChangeBlockColor),
    ("say-text", CommandKind::SayText),
    ("turn-towards-face", CommandKind::TurnTowardsFace),
    ("stop-all-motors", CommandKind::StopAllMotors),
    ("move-head", CommandKind::SetHeadAngle),
    ("move-lift", CommandKind::SetLiftHeight),
    ("turn-to-face", CommandKind::TurnTowardsFace),
    ("place-on-object", CommandKind::PlaceObjectOn),
];

/// Resolve a request name, aliases included.
pub fn lookup(name: &str) -> Option<CommandKind> {
    COMMAND_TABLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub command: Command,
    pub parallel: bool,
}

/// Read and validate the parameters of a `kind` request rooted at `node`.
///
/// # Errors
///
/// Returns an [`ActionFailure`] with code `malformed-request` when a required
/// parameter is missing or has the wrong shape, or `invalid-color` for an
/// unknown colour name.
pub fn parse_request(
    wm: &WorkingMemory,
    kind: CommandKind,
    node: NodeId,
) -> Result<ParsedRequest, ActionFailure> {
    let p = Params { wm, node };
    let command = match kind {
        CommandKind::DriveForward => Command::DriveForward {
            distance_mm: p.number("distance")?,
            speed_mmps: p.positive("speed")?,
        },
        CommandKind::TurnInPlace => Command::TurnInPlace {
            angle_deg: p.number("angle")?,
            speed_dps: p.positive("speed")?,
        },
        CommandKind::GoToObject => Command::GoToObject {
            target: p.target()?,
            distance_mm: p.number("distance")?,
        },
        CommandKind::GoToPose => Command::GoToPose {
            pose: Pose::new(
                p.optional_number("rot")?.unwrap_or(0.0),
                p.number("x")?,
                p.number("y")?,
                0.0,
            ),
        },
        CommandKind::PickUpObject => Command::PickUpObject { target: p.target()? },
        CommandKind::PlaceObjectDown => Command::PlaceObjectDown,
        CommandKind::PlaceObjectOn => Command::PlaceObjectOn { target: p.target()? },
        CommandKind::DockWithCube => Command::DockWithCube {
            target: p.target()?,
            approach_angle_deg: p.optional_number("approach-angle")?,
        },
        CommandKind::SetHeadAngle => Command::SetHeadAngle {
            angle_deg: p.number("angle")?,
            speed_dps: p.optional_number("speed")?,
        },
        CommandKind::SetLiftHeight => {
            let height = p.number("height")?;
            if !(0.0..=1.0).contains(&height) {
                return Err(malformed(format!(
                    "height must be a ratio between 0 and 1, got {height}"
                )));
            }
            Command::SetLiftHeight {
                height,
                speed: p.optional_number("speed")?,
            }
        }
        CommandKind::SetBackpackLights => Command::SetBackpackLights { color: p.color()? },
        CommandKind::ChangeBlockColor => Command::ChangeBlockColor {
            target: p.target()?,
            color: p.color()?,
        },
        CommandKind::SayText => Command::SayText { text: p.text("text")? },
        CommandKind::TurnTowardsFace => Command::TurnTowardsFace { face: p.id(&["face-id"])? },
        CommandKind::StopAllMotors => Command::StopAllMotors,
    };
    let parallel = match wm.child_value(node, PARALLEL_ATTR) {
        None => false,
        Some(v) => v
            .as_flag()
            .ok_or_else(|| malformed(format!("'{PARALLEL_ATTR}' must be a flag, got {v}")))?,
    };
    Ok(ParsedRequest { command, parallel })
}

fn malformed(reason: String) -> ActionFailure {
    ActionFailure::new("malformed-request", reason)
}

struct Params<'a> {
    wm: &'a WorkingMemory,
    node: NodeId,
}

impl Params<'_> {
    fn value(&self, attr: &str) -> Option<&Value> {
        self.wm.child_value(self.node, attr)
    }

    fn optional_number(&self, attr: &str) -> Result<Option<f32>, ActionFailure> {
        match self.value(attr) {
            None => Ok(None),
            // Checked after narrowing: large f64s become infinite f32s.
            Some(v) => v
                .as_f64()
                .map(|n| n as f32)
                .filter(|n| n.is_finite())
                .map(Some)
                .ok_or_else(|| malformed(format!("'{attr}' must be a finite number, got {v}"))),
        }
    }

    fn number(&self, attr: &str) -> Result<f32, ActionFailure> {
        self.optional_number(attr)?
            .ok_or_else(|| malformed(format!("missing parameter '{attr}'")))
    }

    fn positive(&self, attr: &str) -> Result<f32, ActionFailure> {
        let n = self.number(attr)?;
        if n > 0.0 {
            Ok(n)
        } else {
            Err(malformed(format!("'{attr}' must be positive, got {n}")))
        }
    }

    /// First present attribute of `attrs`, as a non-negative integer id.
    fn id(&self, attrs: &[&str]) -> Result<u32, ActionFailure> {
        let Some((attr, v)) = attrs
            .iter()
            .find_map(|a| self.value(a).map(|v| (*a, v)))
        else {
            return Err(malformed(format!(
                "missing parameter '{}'",
                attrs.join("' or '")
            )));
        };
        v.as_i64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed(format!("'{attr}' must be a non-negative integer, got {v}")))
    }

    fn target(&self) -> Result<u32, ActionFailure> {
        self.id(TARGET_ATTRS)
    }

    fn text(&self, attr: &str) -> Result<String, ActionFailure> {
        match self.value(attr) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(Value::Int(n)) => Ok(n.to_string()),
            Some(v) => Err(malformed(format!("'{attr}' must be text, got {v}"))),
            None => Err(malformed(format!("missing parameter '{attr}'"))),
        }
    }

    fn color(&self) -> Result<LightColor, ActionFailure> {
        let name = self.text("color")?;
        LightColor::parse(&name).ok_or_else(|| {
            ActionFailure::new(
                "invalid-color",
                format!("unknown colour '{name}', expected red, green, blue, white or off"),
            )
        })
    }
}
