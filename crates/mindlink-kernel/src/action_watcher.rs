//! [`ActionWatcher`] – detects new requests on the output link.
//!
//! Every top-level identifier under the output link is a candidate request.
//! The watcher remembers every fact id it has reported, so a rescan of an
//! unchanged output link yields nothing.  Names outside the command table
//! are marked seen and left alone.

use std::collections::BTreeSet;

use mindlink_memory::{FactId, NodeId, Value, WorkingMemory};
use mindlink_types::ActionFailure;
use tracing::{debug, warn};

use crate::command_table::{self, ParsedRequest};

/// A newly appeared, recognised request.
#[derive(Debug, Clone, PartialEq)]
pub struct Detected {
    pub fact: FactId,
    pub node: NodeId,
    /// Name as written by the engine (may be an alias).
    pub name: String,
    pub parsed: Result<ParsedRequest, ActionFailure>,
}

/// Result of one [`ActionWatcher::scan`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Scan {
    /// New recognised requests, oldest fact first.
    pub detected: Vec<Detected>,
    /// Previously reported requests no longer on the output link.
    pub gone: Vec<FactId>,
}

impl Scan {
    pub fn is_empty(&self) -> bool {
        self.detected.is_empty() && self.gone.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ActionWatcher {
    reported: BTreeSet<FactId>,
    ignored: BTreeSet<FactId>,
}

impl ActionWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the output link against what has already been reported.
    pub fn scan(&mut self, wm: &WorkingMemory) -> Scan {
        let mut scan = Scan::default();
        let mut live = BTreeSet::new();

        for fact in wm.children(wm.output_link()) {
            let Value::Id(node) = fact.value else { continue };
            live.insert(fact.id);
            if self.reported.contains(&fact.id) || self.ignored.contains(&fact.id) {
                continue;
            }
            let Some(kind) = command_table::lookup(&fact.attr) else {
                debug!(request = %fact.id, name = %fact.attr, "ignoring unrecognised output");
                self.ignored.insert(fact.id);
                continue;
            };
            let parsed = command_table::parse_request(wm, kind, node);
            if let Err(failure) = &parsed {
                warn!(request = %fact.id, name = %fact.attr, %failure, "malformed action request");
            }
            self.reported.insert(fact.id);
            scan.detected.push(Detected {
                fact: fact.id,
                node,
                name: fact.attr.clone(),
                parsed,
            });
        }

        scan.gone = self.reported.difference(&live).copied().collect();
        for fact in &scan.gone {
            self.reported.remove(fact);
        }
        self.ignored.retain(|f| live.contains(f));
        scan
    }

    pub fn reported_count(&self) -> usize {
        self.reported.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindlink_memory::FactTree;
    use mindlink_types::Command;

    fn drive() -> FactTree {
        FactTree::branch().with("distance", 50).with("speed", 30)
    }

    #[test]
    fn rescan_reports_nothing_new() {
        let mut wm = WorkingMemory::new();
        let out = wm.output_link();
        let fact = wm.insert_tree(out, "drive-forward", drive()).unwrap();

        let mut watcher = ActionWatcher::new();
        let first = watcher.scan(&wm);
        assert_eq!(first.detected.len(), 1);
        assert_eq!(first.detected[0].fact, fact);
        assert!(matches!(
            first.detected[0].parsed,
            Ok(ParsedRequest { command: Command::DriveForward { .. }, .. })
        ));

        assert!(watcher.scan(&wm).is_empty());
    }

    #[test]
    fn requests_come_back_in_creation_order() {
        let mut wm = WorkingMemory::new();
        let out = wm.output_link();
        let a = wm.insert_tree(out, "turn-in-place", FactTree::branch().with("angle", 90).with("speed", 45)).unwrap();
        let b = wm.insert_tree(out, "drive-forward", drive()).unwrap();

        let scan = ActionWatcher::new().scan(&wm);
        let ids: Vec<_> = scan.detected.iter().map(|d| d.fact).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn unrecognised_and_scalar_outputs_are_ignored() {
        let mut wm = WorkingMemory::new();
        let out = wm.output_link();
        let scratch = wm.insert_tree(out, "scratchpad", FactTree::branch()).unwrap();
        wm.insert_tree(out, "counter", FactTree::Leaf(3.into())).unwrap();

        let mut watcher = ActionWatcher::new();
        assert!(watcher.scan(&wm).detected.is_empty());
        assert!(wm.contains(scratch));
        assert_eq!(watcher.reported_count(), 0);
    }

    #[test]
    fn malformed_requests_are_reported_with_failure() {
        let mut wm = WorkingMemory::new();
        let out = wm.output_link();
        wm.insert_tree(out, "drive-forward", FactTree::branch().with("distance", 50))
            .unwrap();
        let scan = ActionWatcher::new().scan(&wm);
        let failure = scan.detected[0].parsed.clone().unwrap_err();
        assert_eq!(failure.code, "malformed-request");
    }

    #[test]
    fn retracted_requests_are_reported_gone_once() {
        let mut wm = WorkingMemory::new();
        let out = wm.output_link();
        let fact = wm.insert_tree(out, "stop-all-motors", FactTree::branch()).unwrap();

        let mut watcher = ActionWatcher::new();
        watcher.scan(&wm);
        wm.remove(fact).unwrap();
        assert_eq!(watcher.scan(&wm).gone, vec![fact]);
        assert!(watcher.scan(&wm).is_empty());
    }

    #[test]
    fn recreated_request_is_a_new_request() {
        let mut wm = WorkingMemory::new();
        let out = wm.output_link();
        let first = wm.insert_tree(out, "stop-all-motors", FactTree::branch()).unwrap();
        let mut watcher = ActionWatcher::new();
        watcher.scan(&wm);

        wm.remove(first).unwrap();
        let second = wm.insert_tree(out, "stop-all-motors", FactTree::branch()).unwrap();
        let scan = watcher.scan(&wm);
        assert_eq!(scan.gone, vec![first]);
        assert_eq!(scan.detected[0].fact, second);
    }
}
