//! [`Dispatcher`] – action execution and lifecycle write-back.
//!
//! ```text
//! Requested ─▶ Dispatched ─▶ Running ─▶ Completed ─┐
//!                                   └─▶ Failed ────┴─▶ Acknowledged
//! ```
//!
//! * **Exclusive** commands go through a single lane task fed by an mpsc
//!   queue, so they run one at a time in detection order.
//! * **Concurrent-safe** commands are spawned straight away, bounded by a
//!   semaphore.
//!
//! Actuator tasks never touch the graph.  They report `Started`/`Finished`
//! events over a channel and the owner of the graph calls
//! [`Dispatcher::drain`] at a synchronisation point to turn those events
//! into `status` markers.  Status markers follow delete-then-recreate: the
//! previous marker facts are removed and the new ones inserted in one
//! batch.
//!
//! Every job runs in a task of its own; an actuator that panics fails its
//! request with `actuator-error` and the lane moves on to the next job.
//!
//! A request retracted before its lane picks it up is dropped without ever
//! reaching the actuator.  A request retracted while running finishes, but
//! nothing is written back.
//!
//! [`Dispatcher::new`] spawns the exclusive lane and must be called from
//! within a Tokio runtime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mindlink_hal::RobotAdapter;
use mindlink_memory::{Batch, FactId, FactTree, MemoryError, NodeId, WorkingMemory};
use mindlink_types::{ActionFailure, ActionStatus, Command, ConcurrencyClass};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use crate::action_watcher::Detected;
use crate::command_table::{
    COMPLETED_ATTR, FAILURE_CODE_ATTR, FAILURE_REASON_ATTR, ParsedRequest, STATUS_ATTR,
};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a tracked request.
///
/// `Acknowledged` has no variant: an acknowledged request is simply no
/// longer tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Dispatched,
    Running,
    Completed,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }
}

/// A status change written to the graph, for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub request: FactId,
    pub command: String,
    pub status: ActionStatus,
    pub failure: Option<ActionFailure>,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum ActionEvent {
    Started(FactId),
    Finished(FactId, Result<(), ActionFailure>),
    Dropped(FactId),
}

struct Job {
    fact: FactId,
    command: Command,
    retracted: Arc<AtomicBool>,
}

struct Tracked {
    node: NodeId,
    command: String,
    state: LifecycleState,
    retracted: Arc<AtomicBool>,
    failure: Option<ActionFailure>,
    /// Marker facts currently on the request, removed on the next write.
    markers: Vec<FactId>,
    /// Status not yet written to the graph.
    unwritten: Option<ActionStatus>,
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

pub struct Dispatcher {
    robot: Arc<dyn RobotAdapter>,
    tracked: BTreeMap<FactId, Tracked>,
    exclusive: mpsc::UnboundedSender<Job>,
    events_tx: mpsc::UnboundedSender<ActionEvent>,
    events_rx: mpsc::UnboundedReceiver<ActionEvent>,
    pending: Vec<ActionEvent>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher running at most `max_concurrent` concurrent-safe
    /// commands at once.
    pub fn new(robot: Arc<dyn RobotAdapter>, max_concurrent: usize) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (exclusive, lane_rx) = mpsc::unbounded_channel();
        tokio::spawn(exclusive_lane(robot.clone(), lane_rx, events_tx.clone()));
        Self {
            robot,
            tracked: BTreeMap::new(),
            exclusive,
            events_tx,
            events_rx,
            pending: Vec::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Enter newly detected requests into the lifecycle.
    ///
    /// Valid requests are handed to the exclusive lane or spawned; malformed
    /// ones get their `failed` marker written immediately.  A fact id that is
    /// already tracked is never entered again.
    ///
    /// # Errors
    ///
    /// Propagates a [`MemoryError`] from writing failure markers.
    pub fn submit(
        &mut self,
        wm: &mut WorkingMemory,
        detected: Vec<Detected>,
    ) -> Result<Vec<Transition>, MemoryError> {
        let mut rejected = Vec::new();
        for request in detected {
            if self.tracked.contains_key(&request.fact) {
                warn!(request = %request.fact, "request already tracked, not dispatching again");
                continue;
            }
            match request.parsed {
                Ok(parsed) => self.dispatch(request.fact, request.node, parsed),
                Err(failure) => {
                    self.tracked.insert(
                        request.fact,
                        Tracked {
                            node: request.node,
                            command: request.name,
                            state: LifecycleState::Failed,
                            retracted: Arc::new(AtomicBool::new(false)),
                            failure: Some(failure),
                            markers: Vec::new(),
                            unwritten: Some(ActionStatus::Failed),
                        },
                    );
                    rejected.push(request.fact);
                }
            }
        }
        self.write_markers(wm, &rejected)
    }

    /// Forget requests the engine has retracted.
    ///
    /// Terminal requests become acknowledged; dispatched ones are flagged so
    /// the actuator is never called; running ones finish silently.
    pub fn retire(&mut self, gone: &[FactId]) {
        for fact in gone {
            let Some(tracked) = self.tracked.get_mut(fact) else { continue };
            if tracked.state.is_terminal() {
                debug!(request = %fact, command = %tracked.command, "request acknowledged");
                self.tracked.remove(fact);
            } else {
                info!(
                    request = %fact,
                    command = %tracked.command,
                    state = ?tracked.state,
                    "request retracted while in flight"
                );
                tracked.retracted.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Apply every pending actuator event and write the resulting markers.
    ///
    /// Several events for one request since the last drain collapse into a
    /// single marker write carrying the latest status.
    ///
    /// # Errors
    ///
    /// Propagates a [`MemoryError`] from the marker batch.
    pub fn drain(&mut self, wm: &mut WorkingMemory) -> Result<Vec<Transition>, MemoryError> {
        while let Ok(event) = self.events_rx.try_recv() {
            self.pending.push(event);
        }
        let mut changed = Vec::new();
        for event in std::mem::take(&mut self.pending) {
            if let Some(fact) = self.apply_event(event)
                && !changed.contains(&fact)
            {
                changed.push(fact);
            }
        }
        self.write_markers(wm, &changed)
    }

    /// Wait until at least one actuator event is pending.
    pub async fn wait_for_activity(&mut self) {
        if !self.pending.is_empty() {
            return;
        }
        if let Some(event) = self.events_rx.recv().await {
            self.pending.push(event);
        }
    }

    /// Requests dispatched or running.
    pub fn in_flight(&self) -> usize {
        self.tracked
            .values()
            .filter(|t| !t.state.is_terminal())
            .count()
    }

    /// Requests still tracked, acknowledged ones excluded.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn state_of(&self, fact: FactId) -> Option<LifecycleState> {
        self.tracked.get(&fact).map(|t| t.state)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, fact: FactId, node: NodeId, parsed: ParsedRequest) {
        let ParsedRequest { command, parallel } = parsed;
        let class = command.concurrency(parallel);
        let retracted = Arc::new(AtomicBool::new(false));
        info!(request = %fact, command = command.name(), ?class, "dispatching");
        self.tracked.insert(
            fact,
            Tracked {
                node,
                command: command.name().to_string(),
                state: LifecycleState::Dispatched,
                retracted: retracted.clone(),
                failure: None,
                markers: Vec::new(),
                unwritten: None,
            },
        );
        let job = Job {
            fact,
            command,
            retracted,
        };
        match class {
            ConcurrencyClass::Exclusive => {
                if let Err(mpsc::error::SendError(job)) = self.exclusive.send(job) {
                    let failure = ActionFailure::new("actuator-error", "exclusive lane has stopped");
                    let _ = self.events_tx.send(ActionEvent::Finished(job.fact, Err(failure)));
                }
            }
            ConcurrencyClass::ConcurrentSafe => {
                let robot = self.robot.clone();
                let events = self.events_tx.clone();
                let permits = self.permits.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    run_isolated(robot, job, events).await;
                });
            }
        }
    }

    /// Update lifecycle state; returns the request if a marker must be written.
    fn apply_event(&mut self, event: ActionEvent) -> Option<FactId> {
        let (fact, next) = match event {
            ActionEvent::Dropped(fact) => {
                if let Some(t) = self.tracked.remove(&fact) {
                    info!(request = %fact, command = %t.command, "dropped before dispatch");
                }
                return None;
            }
            ActionEvent::Started(fact) => (fact, LifecycleState::Running),
            ActionEvent::Finished(fact, Ok(())) => (fact, LifecycleState::Completed),
            ActionEvent::Finished(fact, Err(failure)) => {
                if let Some(t) = self.tracked.get_mut(&fact) {
                    t.failure = Some(failure);
                }
                (fact, LifecycleState::Failed)
            }
        };
        let tracked = self.tracked.get_mut(&fact)?;
        if tracked.state.is_terminal() {
            warn!(request = %fact, "event for a finished request ignored");
            return None;
        }
        tracked.state = next;
        let retracted = tracked.retracted.load(Ordering::SeqCst);
        match next {
            LifecycleState::Running => info!(request = %fact, command = %tracked.command, "running"),
            LifecycleState::Completed => info!(request = %fact, command = %tracked.command, "completed"),
            LifecycleState::Failed => warn!(
                request = %fact,
                command = %tracked.command,
                failure = ?tracked.failure,
                "failed"
            ),
            LifecycleState::Dispatched => {}
        }
        if retracted {
            if next.is_terminal() {
                self.tracked.remove(&fact);
            }
            return None;
        }
        tracked.unwritten = Some(match next {
            LifecycleState::Completed => ActionStatus::Complete,
            LifecycleState::Failed => ActionStatus::Failed,
            _ => ActionStatus::Running,
        });
        Some(fact)
    }

    /// Replace the marker facts of `facts` in one batch.
    fn write_markers(
        &mut self,
        wm: &mut WorkingMemory,
        facts: &[FactId],
    ) -> Result<Vec<Transition>, MemoryError> {
        let mut batch = Batch::new();
        let mut slots = Vec::new();
        let mut transitions = Vec::new();

        for fact in facts {
            let Some(tracked) = self.tracked.get(fact) else { continue };
            let Some(status) = tracked.unwritten else { continue };
            if !wm.contains(*fact) || !wm.contains_node(tracked.node) {
                continue;
            }
            for marker in &tracked.markers {
                if wm.contains(*marker) {
                    batch.remove(*marker);
                }
            }
            let mut leaves: Vec<(&str, FactTree)> = vec![(STATUS_ATTR, leaf(status.as_str()))];
            match status {
                ActionStatus::Complete => leaves.push((COMPLETED_ATTR, FactTree::Leaf(1.into()))),
                ActionStatus::Failed => {
                    if let Some(failure) = &tracked.failure {
                        leaves.push((FAILURE_CODE_ATTR, leaf(&failure.code)));
                        leaves.push((FAILURE_REASON_ATTR, leaf(&failure.reason)));
                    }
                }
                ActionStatus::Running => {}
            }
            let fact_slots: Vec<usize> = leaves
                .into_iter()
                .map(|(attr, tree)| batch.insert(tracked.node, attr, tree))
                .collect();
            slots.push((*fact, fact_slots));
            transitions.push(Transition {
                request: *fact,
                command: tracked.command.clone(),
                status,
                failure: if status == ActionStatus::Failed {
                    tracked.failure.clone()
                } else {
                    None
                },
            });
        }
        if batch.is_empty() {
            return Ok(transitions);
        }

        let applied = wm.apply(batch)?;
        for (fact, fact_slots) in slots {
            if let Some(tracked) = self.tracked.get_mut(&fact) {
                tracked.markers = fact_slots.iter().filter_map(|s| applied.fact(*s)).collect();
                tracked.unwritten = None;
            }
        }
        Ok(transitions)
    }
}

fn leaf(s: &str) -> FactTree {
    FactTree::Leaf(s.into())
}

/// Run one job unless it was retracted first.
async fn run_job(robot: &dyn RobotAdapter, job: Job, events: &mpsc::UnboundedSender<ActionEvent>) {
    if job.retracted.load(Ordering::SeqCst) {
        let _ = events.send(ActionEvent::Dropped(job.fact));
        return;
    }
    let _ = events.send(ActionEvent::Started(job.fact));
    let result = robot.execute(&job.command).await;
    let _ = events.send(ActionEvent::Finished(job.fact, result));
}

/// Run `job` in its own task so a panicking actuator fails the request
/// instead of taking the caller down with it.
async fn run_isolated(
    robot: Arc<dyn RobotAdapter>,
    job: Job,
    events: mpsc::UnboundedSender<ActionEvent>,
) {
    let fact = job.fact;
    let task_events = events.clone();
    let handle = tokio::spawn(async move { run_job(robot.as_ref(), job, &task_events).await });
    if let Err(e) = handle.await {
        warn!(request = %fact, error = %e, "actuator task aborted");
        let reason = if e.is_panic() { "actuator panicked" } else { "actuator task cancelled" };
        let failure = ActionFailure::new("actuator-error", reason);
        let _ = events.send(ActionEvent::Finished(fact, Err(failure)));
    }
}

/// Serial executor for exclusive commands.  Ends when the dispatcher drops.
async fn exclusive_lane(
    robot: Arc<dyn RobotAdapter>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    events: mpsc::UnboundedSender<ActionEvent>,
) {
    while let Some(job) = jobs.recv().await {
        run_isolated(robot.clone(), job, events.clone()).await;
    }
    debug!("exclusive lane stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_watcher::ActionWatcher;
    use mindlink_memory::Value;
    use mindlink_types::{BridgeError, SensorSnapshot};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Records `(name, start, end)` for every executed command.
    struct RecordingRobot {
        delay: Duration,
        fail_with: Option<ActionFailure>,
        runs: Mutex<Vec<(&'static str, Instant, Instant)>>,
    }

    impl RecordingRobot {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                fail_with: None,
                runs: Mutex::new(Vec::new()),
            })
        }

        fn failing(failure: ActionFailure) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(5),
                fail_with: Some(failure),
                runs: Mutex::new(Vec::new()),
            })
        }

        fn runs(&self) -> Vec<(&'static str, Instant, Instant)> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RobotAdapter for RecordingRobot {
        async fn read_state(&self) -> Result<SensorSnapshot, BridgeError> {
            Ok(SensorSnapshot::default())
        }

        async fn execute(&self, command: &Command) -> Result<(), ActionFailure> {
            let start = Instant::now();
            tokio::time::sleep(self.delay).await;
            self.runs
                .lock()
                .unwrap()
                .push((command.name(), start, Instant::now()));
            match &self.fail_with {
                Some(f) => Err(f.clone()),
                None => Ok(()),
            }
        }
    }

    /// Panics on `panic_on`, records every other command name.
    struct PanickingRobot {
        panic_on: &'static str,
        ran: Mutex<Vec<&'static str>>,
    }

    impl PanickingRobot {
        fn on(panic_on: &'static str) -> Arc<Self> {
            Arc::new(Self {
                panic_on,
                ran: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl RobotAdapter for PanickingRobot {
        async fn read_state(&self) -> Result<SensorSnapshot, BridgeError> {
            Ok(SensorSnapshot::default())
        }

        async fn execute(&self, command: &Command) -> Result<(), ActionFailure> {
            if command.name() == self.panic_on {
                panic!("motor controller fault");
            }
            self.ran.lock().unwrap().push(command.name());
            Ok(())
        }
    }

    struct Rig {
        wm: WorkingMemory,
        watcher: ActionWatcher,
        dispatcher: Dispatcher,
    }

    impl Rig {
        fn new(robot: Arc<dyn RobotAdapter>) -> Self {
            Self {
                wm: WorkingMemory::new(),
                watcher: ActionWatcher::new(),
                dispatcher: Dispatcher::new(robot, 4),
            }
        }

        fn request(&mut self, name: &str, tree: FactTree) -> FactId {
            let out = self.wm.output_link();
            self.wm.insert_tree(out, name, tree).unwrap()
        }

        fn sync(&mut self) -> Vec<Transition> {
            let scan = self.watcher.scan(&self.wm);
            self.dispatcher.retire(&scan.gone);
            let mut t = self.dispatcher.submit(&mut self.wm, scan.detected).unwrap();
            t.extend(self.dispatcher.drain(&mut self.wm).unwrap());
            t
        }

        async fn settle(&mut self) -> Vec<Transition> {
            let mut all = Vec::new();
            while self.dispatcher.in_flight() > 0 {
                tokio::time::timeout(Duration::from_secs(5), self.dispatcher.wait_for_activity())
                    .await
                    .expect("actuator event");
                all.extend(self.sync());
            }
            all
        }

        fn status(&self, fact: FactId) -> Option<String> {
            let node = self.wm.fact(fact)?.value.as_id()?;
            self.wm
                .child_value(node, STATUS_ATTR)
                .and_then(Value::as_str)
                .map(str::to_string)
        }

        fn count(&self, fact: FactId, attr: &str) -> usize {
            let node = self.wm.fact(fact).unwrap().value.as_id().unwrap();
            self.wm.children(node).filter(|f| f.attr == attr).count()
        }
    }

    fn drive() -> FactTree {
        FactTree::branch().with("distance", 50).with("speed", 30)
    }

    #[tokio::test]
    async fn drive_forward_runs_then_completes_once() {
        let robot = RecordingRobot::new(Duration::from_millis(60));
        let mut rig = Rig::new(robot.clone());
        let req = rig.request("drive-forward", drive());

        rig.sync();
        tokio::time::sleep(Duration::from_millis(20)).await;
        rig.sync();
        assert_eq!(rig.status(req).as_deref(), Some("running"));
        assert_eq!(rig.dispatcher.state_of(req), Some(LifecycleState::Running));

        let transitions = rig.settle().await;
        assert_eq!(rig.status(req).as_deref(), Some("complete"));
        assert_eq!(rig.count(req, COMPLETED_ATTR), 1);
        assert_eq!(rig.count(req, STATUS_ATTR), 1);
        assert_eq!(
            transitions.iter().filter(|t| t.status == ActionStatus::Complete).count(),
            1
        );

        for _ in 0..3 {
            assert!(rig.sync().is_empty());
        }
        assert_eq!(robot.runs().len(), 1);
        assert_eq!(rig.count(req, COMPLETED_ATTR), 1);
    }

    #[tokio::test]
    async fn malformed_request_fails_without_actuator() {
        let robot = RecordingRobot::new(Duration::ZERO);
        let mut rig = Rig::new(robot.clone());
        let req = rig.request("drive-forward", FactTree::branch().with("distance", 50));

        let transitions = rig.sync();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].status, ActionStatus::Failed);
        assert_eq!(rig.status(req).as_deref(), Some("failed"));
        assert_eq!(rig.count(req, FAILURE_CODE_ATTR), 1);
        assert_eq!(rig.dispatcher.in_flight(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        rig.sync();
        assert!(robot.runs().is_empty());
    }

    #[tokio::test]
    async fn exclusive_requests_never_overlap() {
        let robot = RecordingRobot::new(Duration::from_millis(30));
        let mut rig = Rig::new(robot.clone());
        rig.request("drive-forward", drive());
        rig.request("turn-in-place", FactTree::branch().with("angle", 90).with("speed", 45));
        rig.sync();
        rig.settle().await;

        let runs = robot.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, "drive-forward");
        assert_eq!(runs[1].0, "turn-in-place");
        assert!(runs[1].1 >= runs[0].2, "B must start after A ends");
    }

    #[tokio::test]
    async fn concurrent_safe_overlaps_exclusive() {
        let robot = RecordingRobot::new(Duration::from_millis(80));
        let mut rig = Rig::new(robot.clone());
        rig.request("drive-forward", drive());
        rig.request("say-text", FactTree::branch().with("text", "hi"));
        rig.sync();
        rig.settle().await;

        let runs = robot.runs();
        let drive = runs.iter().find(|r| r.0 == "drive-forward").unwrap();
        let say = runs.iter().find(|r| r.0 == "say-text").unwrap();
        assert!(say.1 < drive.2 && drive.1 < say.2, "runs must overlap");
    }

    #[tokio::test]
    async fn retraction_before_dispatch_skips_actuator() {
        let robot = RecordingRobot::new(Duration::from_millis(60));
        let mut rig = Rig::new(robot.clone());
        let first = rig.request("drive-forward", drive());
        let second = rig.request("turn-in-place", FactTree::branch().with("angle", 90).with("speed", 45));
        rig.sync();

        // `second` is queued behind `first` in the exclusive lane.
        rig.wm.remove(second).unwrap();
        rig.sync();
        rig.settle().await;

        let runs = robot.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "drive-forward");
        assert_eq!(rig.status(first).as_deref(), Some("complete"));
        assert_eq!(rig.dispatcher.state_of(second), None);
    }

    #[tokio::test]
    async fn actuator_failure_writes_code_and_reason() {
        let robot = RecordingRobot::failing(ActionFailure::new("object-not-visible", "cube 3 lost"));
        let mut rig = Rig::new(robot);
        let req = rig.request("pick-up-object", FactTree::branch().with("object-id", 3));
        rig.sync();
        let transitions = rig.settle().await;

        assert_eq!(rig.status(req).as_deref(), Some("failed"));
        let node = rig.wm.fact(req).unwrap().value.as_id().unwrap();
        assert_eq!(
            rig.wm.child_value(node, FAILURE_CODE_ATTR).and_then(Value::as_str),
            Some("object-not-visible")
        );
        let failed = transitions.iter().find(|t| t.status == ActionStatus::Failed).unwrap();
        assert_eq!(failed.failure.as_ref().unwrap().reason, "cube 3 lost");
    }

    #[tokio::test]
    async fn acknowledged_requests_are_forgotten() {
        let robot = RecordingRobot::new(Duration::ZERO);
        let mut rig = Rig::new(robot);
        let req = rig.request("stop-all-motors", FactTree::branch());
        rig.sync();
        rig.settle().await;
        assert_eq!(rig.dispatcher.state_of(req), Some(LifecycleState::Completed));

        rig.wm.remove(req).unwrap();
        rig.sync();
        assert_eq!(rig.dispatcher.tracked_count(), 0);
    }

    #[tokio::test]
    async fn running_request_retracted_finishes_silently() {
        let robot = RecordingRobot::new(Duration::from_millis(40));
        let mut rig = Rig::new(robot.clone());
        let req = rig.request("drive-forward", drive());
        rig.sync();
        tokio::time::sleep(Duration::from_millis(10)).await;
        rig.wm.remove(req).unwrap();
        rig.sync();
        rig.settle().await;

        assert_eq!(robot.runs().len(), 1);
        assert_eq!(rig.dispatcher.tracked_count(), 0);
    }

    #[tokio::test]
    async fn panicking_actuator_fails_request_and_lane_keeps_serving() {
        let robot = PanickingRobot::on("drive-forward");
        let mut rig = Rig::new(robot.clone());
        let crashed = rig.request("drive-forward", drive());
        let next = rig.request("turn-in-place", FactTree::branch().with("angle", 90).with("speed", 45));
        rig.sync();
        rig.settle().await;

        assert_eq!(rig.status(crashed).as_deref(), Some("failed"));
        let node = rig.wm.fact(crashed).unwrap().value.as_id().unwrap();
        assert_eq!(
            rig.wm.child_value(node, FAILURE_CODE_ATTR).and_then(Value::as_str),
            Some("actuator-error")
        );
        assert_eq!(rig.status(next).as_deref(), Some("complete"));
        assert_eq!(*robot.ran.lock().unwrap(), vec!["turn-in-place"]);
        assert_eq!(rig.dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_concurrent_command_still_finishes() {
        let robot = PanickingRobot::on("say-text");
        let mut rig = Rig::new(robot);
        let req = rig.request("say-text", FactTree::branch().with("text", "hi"));
        rig.sync();
        rig.settle().await;
        assert_eq!(rig.dispatcher.state_of(req), Some(LifecycleState::Failed));
    }
}
