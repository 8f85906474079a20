//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//!
//! Edges are stored on both ends. A node keeps its sources in read order
//! (so a pull can check them in the order the computation saw them) and its
//! subscribers in an insertion-ordered map from subscriber to the run stamp
//! the subscriber had when it last read this node.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

/// Inline capacity for source lists. Most computations read a handful of cells.
pub(crate) type SourceList = SmallVec<[NodeId; 4]>;

/// Unique identifier for a node in the dependency graph.
///
/// Ids are allocated from a process-wide counter, so they also encode
/// creation order: a node created later always has a larger id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node (computed). These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents.
    Effect,
}

/// Dirty state of a node.
///
/// Ordered so that a node's state only ever rises until it is brought up
/// to date: `Clean < Check < Dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// Something upstream changed, but not a direct source. The node must
    /// bring its derived sources up to date before deciding whether to run.
    Check,

    /// A direct source changed. The node must run.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Incremented at the start of every run; stamps the edges read during it.
    run: u64,

    /// True while the node's computation is on the call stack.
    running: bool,

    /// Nodes read during the current (or most recent) run, in read order.
    sources: SourceList,

    /// Sources from the previous run, held while a run is in flight.
    previous_sources: SourceList,

    /// Nodes that read this one, with the subscriber's run stamp at read time.
    subscribers: IndexMap<NodeId, u64>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                NodeKind::Derived => DirtyState::Dirty, // Start dirty to ensure first computation
                NodeKind::Effect => DirtyState::Clean,
            },
            run: 0,
            running: false,
            sources: SourceList::new(),
            previous_sources: SourceList::new(),
            subscribers: IndexMap::new(),
        }
    }

    /// Create a new source (signal) node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new derived (computed) node.
    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new effect node.
    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Check if the node needs any processing.
    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    /// Whether the node's computation is currently executing.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The stamp of the current or most recent run.
    pub fn run_stamp(&self) -> u64 {
        self.run
    }

    /// Mark the node as clean.
    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Raise the dirty state. Returns the previous state if it changed.
    pub(crate) fn raise(&mut self, state: DirtyState) -> Option<DirtyState> {
        if self.dirty < state {
            Some(std::mem::replace(&mut self.dirty, state))
        } else {
            None
        }
    }

    /// Nodes this node read during its latest run, in read order.
    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    /// Nodes that currently depend on this node.
    pub fn subscribers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.subscribers.keys().copied()
    }

    /// Number of nodes that currently depend on this node.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Start a new run: bump the stamp and set the old sources aside.
    pub(crate) fn begin_run(&mut self) {
        self.run = self.run.wrapping_add(1);
        self.running = true;
        self.previous_sources = std::mem::take(&mut self.sources);
    }

    /// Record a subscriber read. Returns false if it was already recorded
    /// during the subscriber's current run.
    pub(crate) fn stamp_subscriber(&mut self, subscriber: NodeId, run: u64) -> bool {
        self.subscribers.insert(subscriber, run) != Some(run)
    }

    /// Whether `subscriber` read this node during the run stamped `run`.
    pub(crate) fn read_by(&self, subscriber: NodeId, run: u64) -> bool {
        self.subscribers.get(&subscriber) == Some(&run)
    }

    pub(crate) fn push_source(&mut self, source: NodeId) {
        self.sources.push(source);
    }

    pub(crate) fn take_previous_sources(&mut self) -> SourceList {
        self.running = false;
        std::mem::take(&mut self.previous_sources)
    }

    pub(crate) fn remove_subscriber(&mut self, subscriber: NodeId) {
        self.subscribers.shift_remove(&subscriber);
    }

    pub(crate) fn forget_source(&mut self, source: NodeId) {
        self.sources.retain(|s| *s != source);
        self.previous_sources.retain(|s| *s != source);
    }

    /// Every source this node may still be linked to, including those
    /// set aside by an in-flight run.
    pub(crate) fn all_sources(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sources.iter().chain(self.previous_sources.iter()).copied()
    }
}
