//! [`CycleCoordinator`] – owns the cycle boundary.
//!
//! One call to [`CycleCoordinator::run_cycle`] is one decision cycle:
//!
//! 1. **Settle actions** – actuator events that arrived since the last
//!    cycle become `status` markers.
//! 2. **Input phase** – read one snapshot, reconcile identities and apply
//!    every input-link change in a single batch.
//! 3. **Decide** – hand the graph to the [`DecisionEngine`].
//! 4. **Output phase** – if the engine changed the output link, scan it for
//!    new and retracted requests and feed them to the dispatcher; then write
//!    any markers that are ready.
//!
//! Only actuator calls ever wait on the robot, and they run on their own
//! tasks.  Steps 1, 2 and 4 are bounded.
//!
//! # Errors
//!
//! Sensor, identity, malformed-request and actuator problems are logged and
//! published on the bus; the cycle carries on.  A
//! [`BridgeError::Protocol`] from the engine, or a graph operation the store
//! rejects, stops the coordinator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mindlink_hal::RobotAdapter;
use mindlink_kernel::{ActionWatcher, Dispatcher, GraphWriter, Transition, WriteSummary};
use mindlink_memory::{MemoryError, Region, WorkingMemory};
use mindlink_middleware::{EventBus, Topic};
use mindlink_perception::{IdentityReconciler, SnapshotReader};
use mindlink_types::{BridgeError, Event, EventPayload, TelemetryData};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;

const SOURCE: &str = "mindlink-runtime::coordinator";

/// The rule engine the bridge serves.
///
/// `cycle` runs one full decision cycle over `wm`.  The engine may read
/// anything, may add and remove facts under the output link, and should
/// not write to the input link.  A remembered entity it retracts anyway is
/// written again the next time the robot sees it.
pub trait DecisionEngine: Send {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Return [`BridgeError::Protocol`] when the engine can no longer be
    /// driven; any other error is logged and the loop continues.
    fn cycle(&mut self, wm: &mut WorkingMemory) -> Result<(), BridgeError>;
}

/// What happened during one [`CycleCoordinator::run_cycle`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub input: WriteSummary,
    pub degraded: bool,
    /// Requests newly picked up from the output link.
    pub detected: usize,
    pub transitions: Vec<Transition>,
}

pub struct CycleCoordinator<E: DecisionEngine> {
    engine: E,
    wm: WorkingMemory,
    reader: SnapshotReader,
    reconciler: IdentityReconciler,
    writer: GraphWriter,
    watcher: ActionWatcher,
    dispatcher: Dispatcher,
    bus: EventBus,
    cycle: u64,
    scanned_generation: Option<u64>,
}

impl<E: DecisionEngine> CycleCoordinator<E> {
    /// Wire a coordinator around `engine` and `robot`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(engine: E, robot: Arc<dyn RobotAdapter>, bus: EventBus, config: &BridgeConfig) -> Self {
        info!(engine = engine.name(), "bridge coordinator starting");
        Self {
            engine,
            wm: WorkingMemory::new(),
            reader: SnapshotReader::new(robot.clone(), config.snapshot_timeout),
            reconciler: IdentityReconciler::new(
                config.position_epsilon_mm,
                config.rotation_epsilon_deg,
            ),
            writer: GraphWriter::new(),
            watcher: ActionWatcher::new(),
            dispatcher: Dispatcher::new(robot, config.max_concurrent_actions),
            bus,
            cycle: 0,
            scanned_generation: None,
        }
    }

    pub fn memory(&self) -> &WorkingMemory {
        &self.wm
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn reconciler(&self) -> &IdentityReconciler {
        &self.reconciler
    }

    pub fn writer(&self) -> &GraphWriter {
        &self.writer
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Run one decision cycle.
    ///
    /// # Errors
    ///
    /// Returns only fatal errors; see the module docs.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, BridgeError> {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        let settled = self.dispatcher.drain(&mut self.wm).map_err(protocol)?;
        self.publish_transitions(&settled);
        report.transitions.extend(settled);

        let (input, degraded) = self.input_phase().await?;
        report.input = input;
        report.degraded = degraded;

        if let Err(err) = self.engine.cycle(&mut self.wm) {
            if err.is_fatal() {
                error!(engine = self.engine.name(), error = %err, "decision engine failed");
                return Err(err);
            }
            warn!(engine = self.engine.name(), error = %err, "decision cycle reported an error");
        }

        let (detected, transitions) = self.output_phase()?;
        report.detected = detected;
        report.transitions.extend(transitions);

        self.publish_telemetry();
        debug!(
            cycle = self.cycle,
            detected = report.detected,
            transitions = report.transitions.len(),
            "cycle done"
        );
        Ok(report)
    }

    /// Run cycles every `period` until `shutdown` is set, `max_cycles` have
    /// run, or a fatal error occurs.  Returns the number of cycles run.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop.
    pub async fn run(
        &mut self,
        period: Duration,
        max_cycles: Option<u64>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<u64, BridgeError> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ran = 0;
        while !shutdown.load(Ordering::SeqCst) && max_cycles.is_none_or(|max| ran < max) {
            ticker.tick().await;
            self.run_cycle().await?;
            ran += 1;
        }
        info!(cycles = ran, "cycle loop stopped");
        Ok(ran)
    }

    /// Wait for every in-flight request to finish and write its markers,
    /// without running decision cycles.  Gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if a marker write is rejected by the store.
    pub async fn settle(&mut self, timeout: Duration) -> Result<Vec<Transition>, BridgeError> {
        let mut all = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while self.dispatcher.in_flight() > 0 {
            let waited =
                tokio::time::timeout_at(deadline, self.dispatcher.wait_for_activity()).await;
            let transitions = self.dispatcher.drain(&mut self.wm).map_err(protocol)?;
            self.publish_transitions(&transitions);
            all.extend(transitions);
            if waited.is_err() {
                warn!(in_flight = self.dispatcher.in_flight(), "settle timed out");
                break;
            }
        }
        self.scanned_generation = Some(self.wm.generation(Region::Output));
        Ok(all)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn input_phase(&mut self) -> Result<(WriteSummary, bool), BridgeError> {
        let snapshot = self.reader.read().await;
        if let Some(fault) = self.reader.last_fault() {
            self.bus.publish(
                Topic::SystemAlerts,
                Event::new(SOURCE, EventPayload::SensorDegraded(fault.to_string())),
            );
        }

        for marker in self.writer.forget_retracted(&self.wm) {
            self.reconciler.forget(marker);
            info!(%marker, "remembered entity retracted by the engine");
        }
        let reconciliation = self.reconciler.reconcile(&snapshot.entities);
        for anomaly in &reconciliation.anomalies {
            if let BridgeError::IdentityAnomaly { marker, details } = anomaly {
                self.bus.publish(
                    Topic::SystemAlerts,
                    Event::new(
                        SOURCE,
                        EventPayload::IdentityAnomaly {
                            marker: *marker,
                            details: details.clone(),
                        },
                    ),
                );
            }
        }

        let summary = self
            .writer
            .write(&mut self.wm, &snapshot, &reconciliation)
            .map_err(protocol)?;
        self.reconciler.commit(&reconciliation.decisions);
        Ok((summary, snapshot.degraded))
    }

    fn output_phase(&mut self) -> Result<(usize, Vec<Transition>), BridgeError> {
        let generation = self.wm.generation(Region::Output);
        let mut transitions = Vec::new();
        let mut detected = 0;

        if self.scanned_generation != Some(generation) {
            let scan = self.watcher.scan(&self.wm);
            self.dispatcher.retire(&scan.gone);
            detected = scan.detected.len();
            transitions = self
                .dispatcher
                .submit(&mut self.wm, scan.detected)
                .map_err(protocol)?;
        }
        transitions.extend(self.dispatcher.drain(&mut self.wm).map_err(protocol)?);
        self.publish_transitions(&transitions);

        // Our own marker writes do not call for another scan.
        self.scanned_generation = Some(self.wm.generation(Region::Output));
        Ok((detected, transitions))
    }

    // -----------------------------------------------------------------------
    // Bus
    // -----------------------------------------------------------------------

    fn publish_transitions(&self, transitions: &[Transition]) {
        for t in transitions {
            self.bus.publish(
                Topic::ActionLifecycle,
                Event::new(
                    SOURCE,
                    EventPayload::ActionStatus {
                        request: t.request.raw(),
                        command: t.command.clone(),
                        status: t.status,
                        failure: t.failure.clone(),
                    },
                ),
            );
        }
    }

    fn publish_telemetry(&self) {
        let robot = self.reader.last_state();
        let (visible_objects, visible_faces) = mindlink_kernel::graph_writer::self_node(&self.wm)
            .map(|node| {
                let count = |attr| {
                    self.wm
                        .child_value(node, attr)
                        .and_then(|v| v.as_i64())
                        .map_or(0, |n| n as usize)
                };
                (count("object-count"), count("face-count"))
            })
            .unwrap_or_default();
        self.bus.publish(
            Topic::Telemetry,
            Event::new(
                SOURCE,
                EventPayload::Telemetry(TelemetryData {
                    cycle: self.cycle,
                    pose: robot.pose,
                    battery_voltage: robot.battery_voltage,
                    visible_objects,
                    visible_faces,
                    remembered: self.reconciler.remembered_count(),
                    actions_in_flight: self.dispatcher.in_flight(),
                }),
            ),
        );
    }
}

fn protocol(err: MemoryError) -> BridgeError {
    error!(error = %err, "graph rejected a bridge write");
    BridgeError::Protocol(format!("graph rejected a bridge write: {err}"))
}
