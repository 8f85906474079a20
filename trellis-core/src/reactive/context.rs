//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! Each runtime keeps a stack of observer slots. Running a computed or an
//! effect pushes its node; [`untrack`] pushes an empty slot so reads inside
//! it attach to nobody. Both are popped by drop guards, so the stack stays
//! balanced even if the computation panics.
//!
//! This design supports nested reactive contexts (e.g., a computed that reads
//! from another computed while an effect is running).

use crate::graph::NodeId;

use super::runtime::Runtime;

/// Guard for one tracked run of a computation.
///
/// Entering starts a new run of the node (old dependencies are set aside),
/// and dropping the guard pops the observer and finalizes the dependency
/// set. Call [`finish`](Self::finish) once the computation has returned so
/// that sources it no longer reads are unlinked; a guard dropped during
/// unwinding keeps them instead.
pub(crate) struct ReactiveContext {
    runtime: Runtime,
    node: NodeId,
    completed: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given node.
    pub(crate) fn enter(runtime: &Runtime, node: NodeId) -> Self {
        runtime.begin_run(node);
        runtime.push_observer(Some(node));
        Self {
            runtime: runtime.clone(),
            node,
            completed: false,
        }
    }

    /// Mark the run as completed and exit the context.
    pub(crate) fn finish(mut self) {
        self.completed = true;
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = self.runtime.pop_observer();
        debug_assert_eq!(
            popped,
            Some(Some(self.node)),
            "ReactiveContext mismatch: expected {:?}",
            self.node
        );
        self.runtime.end_run(self.node, self.completed);
    }
}

/// Guard that suspends tracking until dropped.
pub(crate) struct Untracked {
    runtime: Runtime,
}

impl Untracked {
    pub(crate) fn enter(runtime: &Runtime) -> Self {
        runtime.push_observer(None);
        Self {
            runtime: runtime.clone(),
        }
    }
}

impl Drop for Untracked {
    fn drop(&mut self) {
        let popped = self.runtime.pop_observer();
        debug_assert_eq!(popped, Some(None), "untrack marker mismatch");
    }
}

/// Run `f` without tracking any reads it performs.
///
/// Reads inside `f` neither create nor remove dependency edges for the
/// computation that is currently running. The previous observer is
/// restored even if `f` panics.
///
/// ```rust,ignore
/// effect(move || {
///     let tracked = a.get();
///     let ignored = untrack(|| b.get());
/// });
/// ```
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _untracked = Untracked::enter(&Runtime::current());
    f()
}
