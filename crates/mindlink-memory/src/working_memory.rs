//! [`WorkingMemory`] – identifier/attribute/value fact graph.
//!
//! Every fact is a triple `(parent identifier, attribute, value)` stamped
//! with a [`FactId`] at creation.  Fact ids increase monotonically and are
//! never reused, so a retracted fact can never come back under the same id.
//!
//! Two root identifiers exist from construction: the **input link**, written
//! by the bridge before each decision cycle, and the **output link**, where
//! the engine places action requests.  Each region keeps a generation
//! counter that moves whenever a fact inside it is added or removed, which
//! is how the coordinator notices output-region changes.
//!
//! Facts are never edited in place.  An update is a removal plus an
//! insertion collected into one [`Batch`] and applied with
//! [`WorkingMemory::apply`]: either every operation lands or none does.
//!
//! # Example
//!
//! ```rust
//! use mindlink_memory::{Batch, FactTree, WorkingMemory};
//!
//! let mut wm = WorkingMemory::new();
//! let root = wm.input_link();
//!
//! let pose = FactTree::branch().with("x", 10.0).with("y", 20.0);
//! let fact = wm.insert_tree(root, "pose", pose).unwrap();
//!
//! // Replace it atomically.
//! let mut batch = Batch::new();
//! batch.remove(fact);
//! batch.insert(root, "pose", FactTree::branch().with("x", 15.0).with("y", 20.0));
//! wm.apply(batch).unwrap();
//!
//! assert!(!wm.contains(fact));
//! assert_eq!(wm.children(root).count(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fmt::Write as _;

use thiserror::Error;
use tracing::trace;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers and values
// ─────────────────────────────────────────────────────────────────────────────

/// A graph identifier (an interior node that owns child facts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Creation stamp of a fact.  Ordering follows creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactId(u64);

impl FactId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of the bridge a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Written by the bridge before each decision cycle.
    Input,
    /// Written by the decision engine; the bridge only adds status markers.
    Output,
}

/// The value slot of a fact.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Id(NodeId),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<NodeId> {
        match self {
            Value::Id(n) => Some(*n),
            _ => None,
        }
    }

    /// Truthiness as rules write flags: non-zero numbers or `"true"`/`"yes"`.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Int(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::Str(s) => match s.as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            Value::Id(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:.3}"),
            Value::Str(s) if s.contains(char::is_whitespace) => write!(f, "|{s}|"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Id(n) => write!(f, "{n}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// A single stored fact.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub id: FactId,
    pub parent: NodeId,
    pub attr: String,
    pub value: Value,
}

/// Description of a value or subtree to be created by an insertion.
///
/// Identifiers are only ever minted through a `Branch`; a `Leaf` holding a
/// [`Value::Id`] is rejected so the graph stays a forest rooted at the two
/// links.
#[derive(Debug, Clone, PartialEq)]
pub enum FactTree {
    Leaf(Value),
    Branch(Vec<(String, FactTree)>),
}

impl FactTree {
    /// An empty identifier with no children yet.
    pub fn branch() -> Self {
        FactTree::Branch(Vec::new())
    }

    /// Append a scalar child.  No-op on a leaf.
    pub fn with(self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_tree(attr, FactTree::Leaf(value.into()))
    }

    /// Append a nested subtree.  No-op on a leaf.
    pub fn with_tree(mut self, attr: impl Into<String>, tree: FactTree) -> Self {
        if let FactTree::Branch(children) = &mut self {
            children.push((attr.into(), tree));
        }
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Rejections from the store.  Nothing is modified when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("unknown identifier {0}")]
    UnknownNode(NodeId),
    #[error("unknown fact {0}")]
    UnknownFact(FactId),
    #[error("identifier {0} is removed by the same batch")]
    ParentRemoved(NodeId),
    #[error("identifier values can only be created through a branch")]
    DanglingIdentifier,
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch
// ─────────────────────────────────────────────────────────────────────────────

/// Removals and insertions applied together by [`WorkingMemory::apply`].
///
/// Removals always run before insertions, so a batch that retracts a fact
/// and inserts its replacement never leaves both present.
#[derive(Debug, Default)]
pub struct Batch {
    removals: Vec<FactId>,
    insertions: Vec<(NodeId, String, FactTree)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&mut self, fact: FactId) {
        self.removals.push(fact);
    }

    /// Queue an insertion and return its slot in [`Applied`].
    pub fn insert(&mut self, parent: NodeId, attr: impl Into<String>, tree: FactTree) -> usize {
        self.insertions.push((parent, attr.into(), tree));
        self.insertions.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.insertions.is_empty()
    }

    pub fn removals(&self) -> &[FactId] {
        &self.removals
    }

    pub fn insertion_count(&self) -> usize {
        self.insertions.len()
    }
}

/// Result of a successful [`WorkingMemory::apply`].
#[derive(Debug, Default)]
pub struct Applied {
    inserted: Vec<FactId>,
}

impl Applied {
    /// Fact id created for the insertion queued at `slot`.
    pub fn fact(&self, slot: usize) -> Option<FactId> {
        self.inserted.get(slot).copied()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkingMemory
// ─────────────────────────────────────────────────────────────────────────────

/// The shared fact graph.
#[derive(Debug)]
pub struct WorkingMemory {
    next_node: u64,
    next_fact: u64,
    facts: BTreeMap<FactId, Fact>,
    children: HashMap<NodeId, BTreeSet<FactId>>,
    regions: HashMap<NodeId, Region>,
    input_generation: u64,
    output_generation: u64,
    input_link: NodeId,
    output_link: NodeId,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkingMemory {
    /// Create a graph holding only the two root links.
    pub fn new() -> Self {
        let input_link = NodeId(1);
        let output_link = NodeId(2);
        let mut regions = HashMap::new();
        regions.insert(input_link, Region::Input);
        regions.insert(output_link, Region::Output);
        let mut children = HashMap::new();
        children.insert(input_link, BTreeSet::new());
        children.insert(output_link, BTreeSet::new());
        Self {
            next_node: 3,
            next_fact: 1,
            facts: BTreeMap::new(),
            children,
            regions,
            input_generation: 0,
            output_generation: 0,
            input_link,
            output_link,
        }
    }

    pub fn input_link(&self) -> NodeId {
        self.input_link
    }

    pub fn output_link(&self) -> NodeId {
        self.output_link
    }

    /// Change counter of `region`.
    pub fn generation(&self, region: Region) -> u64 {
        match region {
            Region::Input => self.input_generation,
            Region::Output => self.output_generation,
        }
    }

    pub fn region_of(&self, node: NodeId) -> Option<Region> {
        self.regions.get(&node).copied()
    }

    pub fn contains(&self, fact: FactId) -> bool {
        self.facts.contains_key(&fact)
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.regions.contains_key(&node)
    }

    pub fn fact(&self, fact: FactId) -> Option<&Fact> {
        self.facts.get(&fact)
    }

    /// Total number of live facts.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Facts whose parent is `node`, in creation order.
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = &Fact> + '_ {
        self.children
            .get(&node)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(|id| self.facts.get(id))
    }

    /// First child of `node` with attribute `attr`.
    pub fn child(&self, node: NodeId, attr: &str) -> Option<&Fact> {
        self.children(node).find(|f| f.attr == attr)
    }

    pub fn child_value(&self, node: NodeId, attr: &str) -> Option<&Value> {
        self.child(node, attr).map(|f| &f.value)
    }

    /// Insert a single subtree under `parent`.
    pub fn insert_tree(
        &mut self,
        parent: NodeId,
        attr: impl Into<String>,
        tree: FactTree,
    ) -> Result<FactId, MemoryError> {
        let mut batch = Batch::new();
        let slot = batch.insert(parent, attr, tree);
        let applied = self.apply(batch)?;
        applied.fact(slot).ok_or(MemoryError::UnknownNode(parent))
    }

    /// Remove a fact and, if it holds an identifier, everything below it.
    pub fn remove(&mut self, fact: FactId) -> Result<(), MemoryError> {
        let mut batch = Batch::new();
        batch.remove(fact);
        self.apply(batch).map(|_| ())
    }

    /// Apply every removal, then every insertion, of `batch`.
    ///
    /// The batch is validated in full first; on error the graph is left
    /// exactly as it was.
    pub fn apply(&mut self, batch: Batch) -> Result<Applied, MemoryError> {
        // ── Validate ──────────────────────────────────────────────────────────
        let mut doomed_nodes = HashSet::new();
        for fact in &batch.removals {
            let f = self.facts.get(fact).ok_or(MemoryError::UnknownFact(*fact))?;
            if let Value::Id(node) = f.value {
                self.collect_subtree(node, &mut doomed_nodes);
            }
        }
        for (parent, _, tree) in &batch.insertions {
            if !self.regions.contains_key(parent) {
                return Err(MemoryError::UnknownNode(*parent));
            }
            if doomed_nodes.contains(parent) {
                return Err(MemoryError::ParentRemoved(*parent));
            }
            Self::validate_tree(tree)?;
        }

        // ── Apply ─────────────────────────────────────────────────────────────
        let (removed, inserted) = (batch.removals.len(), batch.insertion_count());
        let mut touched = HashSet::new();
        for fact in batch.removals {
            // An earlier removal in the same batch may already have taken it.
            if let Some(region) = self.destroy(fact) {
                touched.insert(region);
            }
        }
        let mut applied = Applied::default();
        for (parent, attr, tree) in batch.insertions {
            let region = self.regions[&parent];
            let id = self.build(parent, attr, tree, region);
            applied.inserted.push(id);
            touched.insert(region);
        }
        for region in touched {
            match region {
                Region::Input => self.input_generation += 1,
                Region::Output => self.output_generation += 1,
            }
        }
        trace!(removed, inserted, facts = self.facts.len(), "batch applied");
        Ok(applied)
    }

    /// Render `node` and its descendants down to `depth` levels.
    ///
    /// Each line shows the fact id in brackets so an operator can refer to
    /// it, e.g. `[12] ^drive-forward N7`.
    pub fn render(&self, node: NodeId, depth: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "({node})");
        self.render_into(node, depth, 1, &mut out);
        out
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    fn render_into(&self, node: NodeId, depth: usize, level: usize, out: &mut String) {
        if level > depth {
            return;
        }
        for fact in self.children(node) {
            let _ = writeln!(
                out,
                "{}[{}] ^{} {}",
                "  ".repeat(level),
                fact.id.0,
                fact.attr,
                fact.value
            );
            if let Value::Id(child) = fact.value {
                self.render_into(child, depth, level + 1, out);
            }
        }
    }

    fn validate_tree(tree: &FactTree) -> Result<(), MemoryError> {
        match tree {
            FactTree::Leaf(Value::Id(_)) => Err(MemoryError::DanglingIdentifier),
            FactTree::Leaf(_) => Ok(()),
            FactTree::Branch(children) => {
                children.iter().try_for_each(|(_, t)| Self::validate_tree(t))
            }
        }
    }

    fn collect_subtree(&self, node: NodeId, into: &mut HashSet<NodeId>) {
        if !into.insert(node) {
            return;
        }
        for fact in self.children(node) {
            if let Value::Id(child) = fact.value {
                self.collect_subtree(child, into);
            }
        }
    }

    fn build(&mut self, parent: NodeId, attr: String, tree: FactTree, region: Region) -> FactId {
        let value = match tree {
            FactTree::Leaf(v) => v,
            FactTree::Branch(kids) => {
                let node = NodeId(self.next_node);
                self.next_node += 1;
                self.regions.insert(node, region);
                self.children.insert(node, BTreeSet::new());
                for (a, t) in kids {
                    self.build(node, a, t, region);
                }
                Value::Id(node)
            }
        };
        let id = FactId(self.next_fact);
        self.next_fact += 1;
        self.facts.insert(
            id,
            Fact {
                id,
                parent,
                attr,
                value,
            },
        );
        self.children.entry(parent).or_default().insert(id);
        id
    }

    /// Remove `fact` and its subtree; returns the region it lived in.
    fn destroy(&mut self, fact: FactId) -> Option<Region> {
        let f = self.facts.remove(&fact)?;
        if let Some(siblings) = self.children.get_mut(&f.parent) {
            siblings.remove(&fact);
        }
        if let Value::Id(node) = f.value {
            self.destroy_node(node);
        }
        self.regions.get(&f.parent).copied()
    }

    fn destroy_node(&mut self, node: NodeId) {
        let kids = self.children.remove(&node).unwrap_or_default();
        self.regions.remove(&node);
        for kid in kids {
            if let Some(f) = self.facts.remove(&kid) {
                if let Value::Id(child) = f.value {
                    self.destroy_node(child);
                }
            }
        }
    }
}
