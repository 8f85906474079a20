//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued and re-run by the
//!    next flush (right away, or when the outermost batch returns).
//!
//! 3. Before re-running, the effect runs the cleanups registered during its
//!    previous run (last first), then tracks a fresh dependency set.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run when deps change).
//! - Computeds are owned by their handles; effects are owned by the scope
//!   that was active when they were created.
//!
//! # Cleanup
//!
//! Every run gets its own cleanup scope. [`on_cleanup`](super::on_cleanup)
//! inside the body registers on it, and effects created inside the body are
//! owned by it, so they are torn down before the next run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::graph::{Node, NodeId};

use super::context::{untrack, ReactiveContext};
use super::runtime::{Runtime, WeakRuntime};
use super::scope::{CleanupKey, ScopeId};
use super::subscriber::{Reactive, Subscriber};

struct EffectInner {
    id: NodeId,
    runtime: WeakRuntime,
    run: RefCell<Box<dyn FnMut()>>,
    owner: Option<ScopeId>,
    /// Our disposal, as registered on the owner scope.
    owner_cleanup: Cell<Option<CleanupKey>>,
    run_scope: Cell<Option<ScopeId>>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl EffectInner {
    /// Safe to call again after a cleanup panicked: it picks up the
    /// remaining cleanups.
    fn dispose(&self) {
        if !self.disposed.replace(true) {
            trace!(id = ?self.id, runs = self.run_count.get(), "disposing effect");
        }
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let _unlink = Unlink {
            runtime: &runtime,
            id: self.id,
        };
        if let Some(key) = self.owner_cleanup.take() {
            runtime.withdraw_cleanup(key);
        }
        if let Some(scope) = self.run_scope.get() {
            runtime.run_cleanups(scope);
            self.run_scope.set(None);
        }
    }
}

/// Removes the effect's node even if a cleanup unwinds.
struct Unlink<'a> {
    runtime: &'a Runtime,
    id: NodeId,
}

impl Drop for Unlink<'_> {
    fn drop(&mut self) {
        self.runtime.remove_node(self.id);
    }
}

impl Reactive for EffectInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn run(&self) -> bool {
        if self.disposed.get() {
            return false;
        }
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };
        // A body that re-triggers itself synchronously is already running.
        let Ok(mut body) = self.run.try_borrow_mut() else {
            return false;
        };
        let _current = runtime.enter();

        // The scope is only forgotten once all of its cleanups ran, so a
        // panicking cleanup leaves the rest for `dispose`.
        if let Some(previous) = self.run_scope.get() {
            runtime.run_cleanups(previous);
            self.run_scope.set(None);
            // A cleanup may have disposed us.
            if self.disposed.get() {
                return false;
            }
        }

        let scope = runtime.create_scope(self.owner);
        self.run_scope.set(Some(scope));
        let _active = runtime.enter_scope(scope);
        let ctx = ReactiveContext::enter(&runtime, self.id);
        let body: &mut dyn FnMut() = &mut **body;
        body();
        ctx.finish();

        self.run_count.set(self.run_count.get() + 1);
        true
    }
}

/// Handle returned by [`effect`]. Disposing it stops the effect for good.
///
/// Dropping the handle does not dispose the effect; it keeps running until
/// it is disposed explicitly or its owning scope is.
#[derive(Clone)]
pub struct Dispose {
    inner: Rc<EffectInner>,
}

impl Dispose {
    /// Run the current run's cleanups and unsubscribe from every
    /// dependency. The effect never runs again. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of dependencies recorded by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.source_count(self.inner.id))
    }

    /// Get the effect's graph node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }
}

impl fmt::Debug for Dispose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an effect and run it immediately.
///
/// The effect re-runs whenever something it read during its latest run
/// changes. If a scope is active, disposing that scope disposes the effect.
///
/// # Panics
///
/// A panic in the first run unwinds out of this call. Later runs panic
/// out of whatever write or batch flushed them.
///
/// ```rust
/// use trellis_core::reactive::{effect, signal};
/// use std::{cell::Cell, rc::Rc};
///
/// let count = signal(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let dispose = {
///     let (count, seen) = (count.clone(), seen.clone());
///     effect(move || seen.set(count.get()))
/// };
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
///
/// dispose.dispose();
/// count.set(6);
/// assert_eq!(seen.get(), 5);
/// ```
pub fn effect(f: impl FnMut() + 'static) -> Dispose {
    let runtime = Runtime::current();
    let id = runtime.add_node(Node::effect());
    let owner = runtime.current_scope();

    let inner = Rc::new(EffectInner {
        id,
        runtime: runtime.downgrade(),
        run: RefCell::new(Box::new(f)),
        owner,
        owner_cleanup: Cell::new(None),
        run_scope: Cell::new(None),
        disposed: Cell::new(false),
        run_count: Cell::new(0),
    });
    runtime.register(id, Subscriber::Effect(inner.clone()));

    if let Some(owner) = owner {
        let owned: Weak<EffectInner> = Rc::downgrade(&inner);
        let key = runtime.register_cleanup(
            owner,
            Box::new(move || {
                if let Some(inner) = owned.upgrade() {
                    inner.dispose();
                }
            }),
        );
        inner.owner_cleanup.set(key);
    }

    let handle = Dispose { inner };

    let first = handle.clone();
    runtime.batch(move || {
        first.inner.run();
    });
    handle
}

/// Watch `dep` and call `callback` with its value now and on every change.
///
/// `dep` is tracked; `callback` is not. Each callback invocation gets its
/// own cleanup scope, which is run before the next invocation and when the
/// watch is disposed together with the active scope.
///
/// With no active scope there is nothing that could ever dispose the
/// watch, so it runs once and is not re-evaluated.
pub fn watch<T, D, C>(dep: D, mut callback: C)
where
    T: 'static,
    D: Fn() -> T + 'static,
    C: FnMut(T) + 'static,
{
    let runtime = Runtime::current();
    if runtime.current_scope().is_none() {
        let scope = runtime.create_scope(None);
        {
            let _active = runtime.enter_scope(scope);
            let value = untrack(&dep);
            untrack(|| callback(value));
        }
        runtime.discard_scope(scope);
        return;
    }

    effect(move || {
        let value = dep();
        untrack(|| callback(value));
    });
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
