//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and the computations that read them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (signals) or computations (computeds, effects)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a signal changes, the graph is walked once to mark everything
//! downstream as dirty or in need of a check. Derived values are then pulled
//! up to date lazily, and only effects are run eagerly.
//!
//! # Design Decisions
//!
//! 1. Topology lives in one scheduler per runtime rather than inside each
//!    primitive, so propagation never has to call into user types.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (sources) and reverse (subscribers) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
