//! [`GraphWriter`] – applies reconciliation decisions to the input link.
//!
//! All input-side mutations of one cycle are collected into a single
//! [`Batch`] and applied at once, so the engine never sees a half-written
//! snapshot:
//!
//! * `^self` is replaced in full every cycle.
//! * `^percept` facts (entities without a durable marker) are replaced in
//!   full every cycle.
//! * `^object` / `^face` facts are keyed by marker id.  A create inserts, an
//!   update removes the old fact and inserts the new one in the same batch,
//!   and a no-op touches nothing.
//!
//! Input link layout:
//!
//! ```text
//! ^self    ^battery-voltage ^charging ^cliff-detected ^picked-up
//!          ^head-angle ^carrying-block ^carrying-object-id ^robot-id
//!          ^object-count ^face-count ^sensors-degraded
//!          ^pose (^rot ^x ^y ^z) ^lift (^angle ^height ^ratio)
//! ^object  ^marker-id ^type ^name ^liftable ^moving ^connected ^pose
//! ^face    ^marker-id ^name ^expression ^exp-score ^pose
//! ^percept ^kind ^perception-id (object or face fields) ^pose
//! ```

use std::collections::BTreeMap;

use mindlink_memory::{Batch, FactId, FactTree, MemoryError, NodeId, Value, WorkingMemory};
use mindlink_perception::{Decision, Reconciliation};
use mindlink_types::{EntityDetail, MarkerId, PerceivedEntity, Pose, RobotState, SensorSnapshot};
use tracing::debug;

pub const SELF_ATTR: &str = "self";
pub const OBJECT_ATTR: &str = "object";
pub const FACE_ATTR: &str = "face";
pub const PERCEPT_ATTR: &str = "percept";

/// Counts from one [`GraphWriter::write`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub ephemeral: usize,
}

/// Owner of every input-link fact the bridge writes.
#[derive(Debug, Default)]
pub struct GraphWriter {
    self_fact: Option<FactId>,
    remembered: BTreeMap<MarkerId, FactId>,
    ephemeral: Vec<FactId>,
}

impl GraphWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fact currently holding the remembered entity for `marker`.
    pub fn fact_for(&self, marker: MarkerId) -> Option<FactId> {
        self.remembered.get(&marker).copied()
    }

    /// Drop remembered entities whose fact the engine has retracted and
    /// return their markers.  The next sighting of each must be a create.
    pub fn forget_retracted(&mut self, wm: &WorkingMemory) -> Vec<MarkerId> {
        let gone: Vec<MarkerId> = self
            .remembered
            .iter()
            .filter(|(_, fact)| !wm.contains(**fact))
            .map(|(marker, _)| *marker)
            .collect();
        for marker in &gone {
            self.remembered.remove(marker);
        }
        gone
    }

    /// Apply `reconciliation` and the scalar state of `snapshot` in one batch.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryError`] if the store rejects the batch; nothing is
    /// written in that case and the writer's bookkeeping is unchanged.
    pub fn write(
        &mut self,
        wm: &mut WorkingMemory,
        snapshot: &SensorSnapshot,
        reconciliation: &Reconciliation,
    ) -> Result<WriteSummary, MemoryError> {
        let root = wm.input_link();
        let mut batch = Batch::new();
        let mut summary = WriteSummary::default();

        // Facts the engine retracted itself are simply not removed again.
        let drop_if_live = |batch: &mut Batch, fact: FactId| {
            if wm.contains(fact) {
                batch.remove(fact);
            }
        };

        if let Some(old) = self.self_fact {
            drop_if_live(&mut batch, old);
        }
        let self_slot = batch.insert(root, SELF_ATTR, self_tree(&snapshot.robot, snapshot));

        for fact in &self.ephemeral {
            drop_if_live(&mut batch, *fact);
        }
        let percept_slots: Vec<usize> = reconciliation
            .ephemeral
            .iter()
            .map(|e| batch.insert(root, PERCEPT_ATTR, percept_tree(e)))
            .collect();
        summary.ephemeral = percept_slots.len();

        let mut entity_slots = Vec::new();
        for decision in &reconciliation.decisions {
            let entity = match decision {
                Decision::NoOp(_) => {
                    summary.unchanged += 1;
                    continue;
                }
                Decision::Create(e) => {
                    summary.created += 1;
                    e
                }
                Decision::Update(e) => {
                    summary.updated += 1;
                    e
                }
            };
            let Some(marker) = entity.marker else { continue };
            if let Some(old) = self.remembered.get(&marker) {
                drop_if_live(&mut batch, *old);
            }
            let slot = batch.insert(root, entity_attr(entity), remembered_tree(marker, entity));
            entity_slots.push((marker, slot));
        }

        let applied = wm.apply(batch)?;

        self.self_fact = applied.fact(self_slot);
        self.ephemeral = percept_slots
            .into_iter()
            .filter_map(|slot| applied.fact(slot))
            .collect();
        for (marker, slot) in entity_slots {
            if let Some(fact) = applied.fact(slot) {
                self.remembered.insert(marker, fact);
            }
        }
        debug!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            ephemeral = summary.ephemeral,
            "input link written"
        );
        Ok(summary)
    }
}

/// Number of live `^object`/`^face` facts on the input link for `marker`.
pub fn live_marker_facts(wm: &WorkingMemory, marker: MarkerId) -> usize {
    let attr = match marker {
        MarkerId::Fiducial(_) => OBJECT_ATTR,
        MarkerId::Face(_) => FACE_ATTR,
    };
    wm.children(wm.input_link())
        .filter(|f| f.attr == attr)
        .filter_map(|f| f.value.as_id())
        .filter(|node| {
            wm.child_value(*node, "marker-id").and_then(Value::as_i64)
                == Some(i64::from(marker.value()))
        })
        .count()
}

/// Node of the current `^self` subtree.
pub fn self_node(wm: &WorkingMemory) -> Option<NodeId> {
    wm.child_value(wm.input_link(), SELF_ATTR).and_then(Value::as_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree builders
// ─────────────────────────────────────────────────────────────────────────────

fn entity_attr(entity: &PerceivedEntity) -> &'static str {
    if entity.is_face() { FACE_ATTR } else { OBJECT_ATTR }
}

fn pose_tree(pose: &Pose) -> FactTree {
    FactTree::branch()
        .with("rot", pose.rot)
        .with("x", pose.x)
        .with("y", pose.y)
        .with("z", pose.z)
}

fn self_tree(robot: &RobotState, snapshot: &SensorSnapshot) -> FactTree {
    let carrying = robot.carrying_object.map_or(-1, i64::from);
    FactTree::branch()
        .with("robot-id", robot.robot_id.as_str())
        .with("battery-voltage", robot.battery_voltage)
        .with("charging", robot.is_charging)
        .with("cliff-detected", robot.cliff_detected)
        .with("picked-up", robot.picked_up)
        .with("head-angle", robot.head_angle_deg)
        .with("carrying-block", robot.is_carrying_block)
        .with("carrying-object-id", carrying)
        .with("object-count", snapshot.object_count)
        .with("face-count", snapshot.face_count)
        .with("sensors-degraded", snapshot.degraded)
        .with_tree("pose", pose_tree(&robot.pose))
        .with_tree(
            "lift",
            FactTree::branch()
                .with("angle", robot.lift.angle_deg)
                .with("height", robot.lift.height_mm)
                .with("ratio", robot.lift.ratio),
        )
}

fn detail_fields(tree: FactTree, detail: &EntityDetail) -> FactTree {
    match detail {
        EntityDetail::Object {
            type_tag,
            name,
            liftable,
            moving,
            connected,
        } => tree
            .with("type", type_tag.as_str())
            .with("name", name.as_str())
            .with("liftable", *liftable)
            .with("moving", *moving)
            .with("connected", *connected),
        EntityDetail::Face {
            name,
            expression,
            expression_score,
        } => tree
            .with("name", if name.is_empty() { "unknown" } else { name.as_str() })
            .with("expression", expression.as_str())
            .with("exp-score", *expression_score),
    }
}

fn remembered_tree(marker: MarkerId, entity: &PerceivedEntity) -> FactTree {
    let tree = FactTree::branch().with("marker-id", marker.value());
    detail_fields(tree, &entity.detail).with_tree("pose", pose_tree(&entity.pose))
}

fn percept_tree(entity: &PerceivedEntity) -> FactTree {
    let tree = FactTree::branch()
        .with("kind", entity_attr(entity))
        .with("perception-id", entity.perception_id);
    detail_fields(tree, &entity.detail).with_tree("pose", pose_tree(&entity.pose))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindlink_memory::Region;
    use mindlink_perception::IdentityReconciler;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cube(perception_id: u32, marker: Option<u32>, pose: Pose) -> PerceivedEntity {
        PerceivedEntity {
            perception_id,
            marker: marker.map(MarkerId::Fiducial),
            pose,
            detail: EntityDetail::Object {
                type_tag: "led-cube".into(),
                name: "cube".into(),
                liftable: true,
                moving: false,
                connected: true,
            },
        }
    }

    struct Harness {
        wm: WorkingMemory,
        rec: IdentityReconciler,
        writer: GraphWriter,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                wm: WorkingMemory::new(),
                rec: IdentityReconciler::new(1.0, 1.0),
                writer: GraphWriter::new(),
            }
        }

        fn cycle(&mut self, entities: Vec<PerceivedEntity>) -> WriteSummary {
            for marker in self.writer.forget_retracted(&self.wm) {
                self.rec.forget(marker);
            }
            let snapshot = SensorSnapshot::new(RobotState::default(), entities);
            let r = self.rec.reconcile(&snapshot.entities);
            let summary = self.writer.write(&mut self.wm, &snapshot, &r).unwrap();
            self.rec.commit(&r.decisions);
            summary
        }
    }

    #[test]
    fn scenario_create_noop_update() {
        let mut h = Harness::new();
        let marker = MarkerId::Fiducial(2);

        let s1 = h.cycle(vec![cube(1, Some(2), Pose::new(0.0, 10.0, 20.0, 0.0))]);
        assert_eq!(s1.created, 1);
        let first = h.writer.fact_for(marker).unwrap();

        let s2 = h.cycle(vec![cube(1, Some(2), Pose::new(0.0, 10.0, 20.0, 0.0))]);
        assert_eq!((s2.created, s2.updated, s2.unchanged), (0, 0, 1));
        assert_eq!(h.writer.fact_for(marker), Some(first));
        assert!(h.wm.contains(first));

        let s3 = h.cycle(vec![cube(1, Some(2), Pose::new(0.0, 15.0, 20.0, 0.0))]);
        assert_eq!(s3.updated, 1);
        let replaced = h.writer.fact_for(marker).unwrap();
        assert_ne!(replaced, first);
        assert!(!h.wm.contains(first));
        assert_eq!(live_marker_facts(&h.wm, marker), 1);

        let node = h.wm.fact(replaced).unwrap().value.as_id().unwrap();
        let pose = h.wm.child_value(node, "pose").and_then(Value::as_id).unwrap();
        assert_eq!(h.wm.child_value(pose, "x").and_then(Value::as_f64), Some(15.0));
    }

    #[test]
    fn self_is_replaced_every_cycle() {
        let mut h = Harness::new();
        h.cycle(vec![]);
        let first = self_node(&h.wm).unwrap();
        h.cycle(vec![]);
        let second = self_node(&h.wm).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            h.wm.children(h.wm.input_link()).filter(|f| f.attr == SELF_ATTR).count(),
            1
        );
        assert_eq!(
            h.wm.child_value(second, "carrying-object-id").and_then(Value::as_i64),
            Some(-1)
        );
    }

    #[test]
    fn noop_cycle_leaves_remembered_fact_untouched() {
        let mut h = Harness::new();
        h.cycle(vec![cube(1, Some(2), Pose::default())]);
        let fact = h.writer.fact_for(MarkerId::Fiducial(2)).unwrap();
        let before = h.wm.fact(fact).cloned();
        h.cycle(vec![cube(1, Some(2), Pose::default())]);
        assert_eq!(h.wm.fact(fact).cloned(), before);
    }

    #[test]
    fn percepts_are_ephemeral() {
        let mut h = Harness::new();
        let s = h.cycle(vec![cube(9, None, Pose::default())]);
        assert_eq!(s.ephemeral, 1);
        let percepts = |wm: &WorkingMemory| {
            wm.children(wm.input_link())
                .filter(|f| f.attr == PERCEPT_ATTR)
                .count()
        };
        assert_eq!(percepts(&h.wm), 1);
        h.cycle(vec![]);
        assert_eq!(percepts(&h.wm), 0);
    }

    #[test]
    fn faces_use_unknown_for_missing_name() {
        let mut h = Harness::new();
        let face = PerceivedEntity {
            perception_id: 3,
            marker: Some(MarkerId::Face(4)),
            pose: Pose::default(),
            detail: EntityDetail::Face {
                name: String::new(),
                expression: "happy".into(),
                expression_score: 0.8,
            },
        };
        h.cycle(vec![face]);
        let fact = h.writer.fact_for(MarkerId::Face(4)).unwrap();
        assert_eq!(h.wm.fact(fact).unwrap().attr, FACE_ATTR);
        let node = h.wm.fact(fact).unwrap().value.as_id().unwrap();
        assert_eq!(h.wm.child_value(node, "name").and_then(Value::as_str), Some("unknown"));
    }

    #[test]
    fn writer_tolerates_engine_retracting_input_facts() {
        let mut h = Harness::new();
        h.cycle(vec![cube(1, Some(2), Pose::default())]);
        let fact = h.writer.fact_for(MarkerId::Fiducial(2)).unwrap();
        h.wm.remove(fact).unwrap();
        h.cycle(vec![cube(1, Some(2), Pose::new(0.0, 30.0, 0.0, 0.0))]);
        assert_eq!(live_marker_facts(&h.wm, MarkerId::Fiducial(2)), 1);
    }

    #[test]
    fn retracted_object_is_recreated_when_seen_unchanged() {
        let mut h = Harness::new();
        let marker = MarkerId::Fiducial(2);
        h.cycle(vec![cube(1, Some(2), Pose::default())]);
        let fact = h.writer.fact_for(marker).unwrap();
        h.wm.remove(fact).unwrap();

        let s = h.cycle(vec![cube(1, Some(2), Pose::default())]);
        assert_eq!((s.created, s.unchanged), (1, 0));
        let recreated = h.writer.fact_for(marker).unwrap();
        assert_ne!(recreated, fact);
        assert_eq!(live_marker_facts(&h.wm, marker), 1);
    }

    #[test]
    fn retracted_object_out_of_view_stays_forgotten() {
        let mut h = Harness::new();
        let marker = MarkerId::Fiducial(2);
        h.cycle(vec![cube(1, Some(2), Pose::default())]);
        h.wm.remove(h.writer.fact_for(marker).unwrap()).unwrap();

        h.cycle(vec![]);
        assert_eq!(h.writer.fact_for(marker), None);
        assert!(h.rec.remembered(marker).is_none());
        assert_eq!(live_marker_facts(&h.wm, marker), 0);
    }

    #[test]
    fn one_batch_bumps_input_generation_once() {
        let mut h = Harness::new();
        h.cycle(vec![cube(1, Some(2), Pose::default()), cube(2, None, Pose::default())]);
        assert_eq!(h.wm.generation(Region::Input), 1);
        assert_eq!(h.wm.generation(Region::Output), 0);
    }

    #[test]
    fn random_streams_keep_one_fact_per_marker() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut h = Harness::new();
        for _ in 0..300 {
            let n: u32 = rng.gen_range(0..8);
            let entities = (0..n)
                .map(|i| {
                    let marker = if rng.gen_bool(0.6) {
                        Some(rng.gen_range(0..5))
                    } else {
                        None
                    };
                    let x = rng.gen_range(0..4) as f32 * 5.0;
                    cube(i, marker, Pose::new(0.0, x, 0.0, 0.0))
                })
                .collect();
            h.cycle(entities);

            for m in 0..5 {
                let marker = MarkerId::Fiducial(m);
                let expected = usize::from(h.rec.remembered(marker).is_some());
                assert_eq!(live_marker_facts(&h.wm, marker), expected);
            }
            let objects = h
                .wm
                .children(h.wm.input_link())
                .filter(|f| f.attr == OBJECT_ATTR)
                .count();
            assert_eq!(objects, h.rec.remembered_count());
        }
    }
}
