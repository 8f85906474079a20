//! Update Scheduler
//!
//! The scheduler owns every node of one runtime's dependency graph and the
//! set of effects waiting to be flushed.
//!
//! # Algorithm
//!
//! Updates are push-pull:
//!
//! 1. When a source node changes, its direct dependents are marked `Dirty`
//! 2. Everything further downstream is marked `Check`, recursively
//! 3. Effects that leave the clean state join the pending set (once)
//! 4. When pending effects are flushed, each one pulls its derived sources
//!    up to date first. A derived node whose value really changed marks its
//!    own dependents `Dirty`; one whose value came out equal leaves them at
//!    `Check`, and they settle without running.
//!
//! The pending set is drained in creation order, so an effect that owns
//! nested effects always runs before them.
//!
//! # Dynamic dependencies
//!
//! Dependency sets are rebuilt on every run. Rather than clearing all edges
//! up front, each run bumps the subscriber's stamp, reads re-stamp their
//! edge, and at run end only the previous sources whose stamp did not
//! advance are unlinked.

use std::collections::HashMap;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::{DirtyState, Node, NodeId, NodeKind};

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// Effects waiting for the next flush.
    pending: IndexSet<NodeId>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and drops it from the
    /// pending set.
    pub fn remove_node(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.remove(&node_id) else {
            return;
        };

        for source_id in node.all_sources() {
            if let Some(source) = self.nodes.get_mut(&source_id) {
                source.remove_subscriber(node_id);
            }
        }

        for subscriber_id in node.subscribers() {
            if let Some(subscriber) = self.nodes.get_mut(&subscriber_id) {
                subscriber.forget_source(node_id);
            }
        }

        self.pending.shift_remove(&node_id);
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Dirty state of a node, if it exists.
    pub fn state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(&node_id).map(Node::dirty_state)
    }

    /// Kind of a node, if it exists.
    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    /// Whether a node's computation is currently executing.
    pub fn is_running(&self, node_id: NodeId) -> bool {
        self.nodes.get(&node_id).is_some_and(Node::is_running)
    }

    /// Mark a node clean.
    pub fn mark_clean(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.mark_clean();
        }
    }

    /// Start a run of `node_id`, setting its old sources aside.
    pub fn begin_run(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.begin_run();
        }
    }

    /// Record that `subscriber` read `source` during its current run.
    pub fn track(&mut self, source: NodeId, subscriber: NodeId) {
        let Some(run) = self.nodes.get(&subscriber).map(Node::run_stamp) else {
            return;
        };
        let Some(source_node) = self.nodes.get_mut(&source) else {
            return;
        };
        if source_node.stamp_subscriber(subscriber, run) {
            if let Some(subscriber_node) = self.nodes.get_mut(&subscriber) {
                subscriber_node.push_source(source);
            }
        }
    }

    /// Finish the run of `node_id`.
    ///
    /// A completed run unlinks every previous source it did not read again.
    /// A run that unwound keeps those edges so the node is still notified
    /// when they change.
    pub fn end_run(&mut self, node_id: NodeId, completed: bool) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let run = node.run_stamp();
        let previous = node.take_previous_sources();

        let mut kept: SmallVec<[NodeId; 4]> = SmallVec::new();
        for source_id in previous {
            let Some(source) = self.nodes.get_mut(&source_id) else {
                continue;
            };
            if source.read_by(node_id, run) {
                continue;
            }
            if completed {
                source.remove_subscriber(node_id);
            } else {
                kept.push(source_id);
            }
        }

        if let Some(node) = self.nodes.get_mut(&node_id) {
            for source_id in kept {
                node.push_source(source_id);
            }
        }
    }

    /// Mark a source node as changed and propagate dirty flags.
    pub fn mark_changed(&mut self, source_id: NodeId) {
        let subscribers: SmallVec<[NodeId; 8]> = match self.nodes.get(&source_id) {
            Some(source) => source.subscribers().collect(),
            None => return,
        };
        for subscriber in subscribers {
            self.mark(subscriber, DirtyState::Dirty);
        }
    }

    /// A derived node produced a new value: its dependents must run.
    ///
    /// Dependents that are executing right now are skipped; they are the
    /// ones reading the new value.
    pub fn mark_subscribers_dirty(&mut self, node_id: NodeId) {
        let subscribers: SmallVec<[NodeId; 8]> = match self.nodes.get(&node_id) {
            Some(node) => node.subscribers().collect(),
            None => return,
        };
        for subscriber in subscribers {
            if !self.is_running(subscriber) {
                self.mark(subscriber, DirtyState::Dirty);
            }
        }
    }

    /// Raise `node_id` to `state`, queueing effects and marking everything
    /// downstream `Check` the first time a node leaves the clean state.
    fn mark(&mut self, node_id: NodeId, state: DirtyState) {
        let mut stack: SmallVec<[(NodeId, DirtyState); 16]> = SmallVec::new();
        stack.push((node_id, state));

        while let Some((id, state)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.raise(state) != Some(DirtyState::Clean) {
                continue;
            }
            if node.kind() == NodeKind::Effect {
                self.pending.insert(id);
            }
            stack.extend(node.subscribers().map(|s| (s, DirtyState::Check)));
        }
    }

    /// Take every pending effect, in creation order.
    pub fn take_pending(&mut self) -> Vec<NodeId> {
        let mut pending: Vec<NodeId> = self.pending.drain(..).collect();
        pending.sort_unstable();
        pending
    }

    /// Put effects back into the pending set if they still need to run.
    pub fn requeue(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            if self.state(id).is_some_and(|s| s != DirtyState::Clean) {
                self.pending.insert(id);
            }
        }
    }

    /// Drop every pending effect without running it.
    pub fn clear_pending(&mut self) {
        for id in std::mem::take(&mut self.pending) {
            self.mark_clean(id);
        }
    }

    /// Number of effects waiting for a flush.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
