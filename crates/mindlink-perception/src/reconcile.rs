//! [`IdentityReconciler`] – durable identities over a transient stream.
//!
//! Perception ids change whenever an entity leaves the field of view and
//! comes back, so they are never used as a key.  Entities that carry a
//! durable [`MarkerId`] are matched against the remembered set and produce
//! one [`Decision`] each; entities without one are passed through as
//! ephemeral and never remembered.
//!
//! Reconciliation is a pure function of the snapshot and the remembered
//! set.  The remembered set only changes in [`IdentityReconciler::commit`],
//! which the coordinator calls once the decisions have reached the graph.

use std::collections::{BTreeMap, HashMap};

use mindlink_types::{BridgeError, MarkerId, PerceivedEntity};
use tracing::warn;

/// What to do with one marker-bearing entity this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// First sighting of this marker.
    Create(PerceivedEntity),
    /// Known marker whose fields changed beyond tolerance.
    Update(PerceivedEntity),
    /// Known marker, nothing worth rewriting.
    NoOp(MarkerId),
}

impl Decision {
    pub fn marker(&self) -> Option<MarkerId> {
        match self {
            Decision::Create(e) | Decision::Update(e) => e.marker,
            Decision::NoOp(m) => Some(*m),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Decision::NoOp(_))
    }
}

/// Output of one [`IdentityReconciler::reconcile`] pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciliation {
    /// One decision per distinct marker, in snapshot order.
    pub decisions: Vec<Decision>,
    /// Visible entities without a durable marker.
    pub ephemeral: Vec<PerceivedEntity>,
    /// Duplicate markers seen in the snapshot.
    pub anomalies: Vec<BridgeError>,
}

impl Reconciliation {
    pub fn creates(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d, Decision::Create(_)))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d, Decision::Update(_)))
            .count()
    }
}

/// Remembered-entity table keyed by durable marker id.
#[derive(Debug)]
pub struct IdentityReconciler {
    remembered: BTreeMap<MarkerId, PerceivedEntity>,
    position_epsilon: f32,
    rotation_epsilon: f32,
}

impl IdentityReconciler {
    /// `position_epsilon` is in mm, `rotation_epsilon` in degrees.
    pub fn new(position_epsilon: f32, rotation_epsilon: f32) -> Self {
        Self {
            remembered: BTreeMap::new(),
            position_epsilon,
            rotation_epsilon,
        }
    }

    /// Decide create / update / no-op for every visible entity.
    pub fn reconcile(&self, entities: &[PerceivedEntity]) -> Reconciliation {
        let mut out = Reconciliation::default();

        // Last sighting of a marker wins, but keeps the slot of the first.
        let mut slots: HashMap<MarkerId, usize> = HashMap::new();
        let mut winners: Vec<&PerceivedEntity> = Vec::new();
        for entity in entities {
            let Some(marker) = entity.marker else {
                out.ephemeral.push(entity.clone());
                continue;
            };
            match slots.get(&marker) {
                Some(&slot) => {
                    let details = format!(
                        "perception ids {} and {} report the same marker; keeping the later one",
                        winners[slot].perception_id, entity.perception_id
                    );
                    warn!(%marker, %details, "duplicate marker in snapshot");
                    out.anomalies
                        .push(BridgeError::IdentityAnomaly { marker, details });
                    winners[slot] = entity;
                }
                None => {
                    slots.insert(marker, winners.len());
                    winners.push(entity);
                }
            }
        }

        for entity in winners {
            let Some(marker) = entity.marker else { continue };
            let decision = match self.remembered.get(&marker) {
                None => Decision::Create(entity.clone()),
                Some(known) if self.unchanged(known, entity) => Decision::NoOp(marker),
                Some(_) => Decision::Update(entity.clone()),
            };
            out.decisions.push(decision);
        }
        out
    }

    /// Fold applied decisions into the remembered set.
    pub fn commit(&mut self, decisions: &[Decision]) {
        for decision in decisions {
            if let Decision::Create(e) | Decision::Update(e) = decision
                && let Some(marker) = e.marker
            {
                self.remembered.insert(marker, e.clone());
            }
        }
    }

    /// Forget `marker` so its next sighting is a create.
    pub fn forget(&mut self, marker: MarkerId) -> bool {
        self.remembered.remove(&marker).is_some()
    }

    pub fn remembered(&self, marker: MarkerId) -> Option<&PerceivedEntity> {
        self.remembered.get(&marker)
    }

    pub fn remembered_count(&self) -> usize {
        self.remembered.len()
    }

    pub fn markers(&self) -> impl Iterator<Item = MarkerId> + '_ {
        self.remembered.keys().copied()
    }

    fn unchanged(&self, known: &PerceivedEntity, seen: &PerceivedEntity) -> bool {
        known.detail == seen.detail
            && known
                .pose
                .within(&seen.pose, self.position_epsilon, self.rotation_epsilon)
    }
}
