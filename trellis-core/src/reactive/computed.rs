//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its derivation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the computed is marked dirty (a direct
//!    source changed) or "check" (something further upstream changed).
//!    Nothing is recomputed at that point.
//!
//! 4. On next access, a "check" computed first brings its own derived
//!    sources up to date; it only recomputes if one of them really changed.
//!
//! 5. After recomputing, the new value is compared with the cached one. Only
//!    a real change marks the computed's own dependents dirty.
//!
//! # Why This Matters
//!
//! - A signal changes
//! - 10 computeds depend on it
//! - Only the computeds actually read will recompute
//! - Computeds that are never read stay dirty (no wasted work)
//!
//! # Failure
//!
//! If the derivation panics, the previous cached value is kept, the computed
//! stays dirty so the next read retries, and the panic unwinds to the reader.
//!
//! A computed whose runtime is gone computes once more if it never had a
//! value, and otherwise keeps returning its last cached result.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::graph::{DirtyState, Node, NodeId};

use super::context::ReactiveContext;
use super::runtime::{Runtime, WeakRuntime};
use super::signal::EqualsFn;
use super::subscriber::{Reactive, Subscriber};

struct ComputedInner<T> {
    id: NodeId,
    runtime: WeakRuntime,
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    equals: EqualsFn<T>,
}

impl<T> Reactive for ComputedInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn run(&self) -> bool {
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };
        let _current = runtime.enter();
        let ctx = ReactiveContext::enter(&runtime, self.id);
        let next = (self.compute)();
        ctx.finish();

        let mut cached = self.value.borrow_mut();
        let changed = match cached.as_ref() {
            Some(previous) => !(self.equals)(previous, &next),
            None => true,
        };
        if changed {
            *cached = Some(next);
        }
        changed
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove_node(self.id);
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The derivation must not have side effects outside the graph: it may run
/// any number of times, or not at all if nobody reads the value.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
/// let doubled = {
///     let count = count.clone();
///     Computed::new(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a new computed with the given derivation.
    ///
    /// The derivation is not run immediately. It runs on first access.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::with_equals(compute, T::eq)
    }
}

impl<T: 'static> Computed<T> {
    /// Create a computed that uses `equals` to decide whether a recomputed
    /// value differs from the cached one.
    pub fn with_equals(compute: impl Fn() -> T + 'static, equals: EqualsFn<T>) -> Self {
        let runtime = Runtime::current();
        let id = runtime.add_node(Node::derived());
        let inner = Rc::new(ComputedInner {
            id,
            runtime: runtime.downgrade(),
            compute: Box::new(compute),
            value: RefCell::new(None),
            equals,
        });
        let weak: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        runtime.register(id, Subscriber::Derived(weak));
        Self { inner }
    }

    /// Get the computed's graph node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Borrow the up-to-date value, tracked.
    ///
    /// # Panics
    ///
    /// Panics if the computed reads itself; see [`try_with`](Self::try_with).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Borrow the up-to-date value, tracked, reporting cycles and depth
    /// overflows as errors.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        if let Some(runtime) = self.refresh()? {
            runtime.track(self.inner.id);
        }
        Ok(self.read_cached(f))
    }

    /// Borrow the up-to-date value without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Err(err) = self.refresh() {
            panic!("{err}");
        }
        self.read_cached(f)
    }

    /// Bring the cache up to date. Returns the runtime, if it is still alive.
    fn refresh(&self) -> Result<Option<Runtime>> {
        match self.inner.runtime.upgrade() {
            Some(runtime) => {
                runtime.refresh(self.inner.id)?;
                Ok(Some(runtime))
            }
            None => {
                if !self.has_value() {
                    let value = (self.inner.compute)();
                    *self.inner.value.borrow_mut() = Some(value);
                }
                Ok(None)
            }
        }
    }

    fn read_cached<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let cached = self.inner.value.borrow();
        f(cached.as_ref().expect("refreshed computed should have a value"))
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        self.inner
            .runtime
            .upgrade()
            .and_then(|runtime| runtime.state(self.inner.id))
            .unwrap_or(DirtyState::Dirty)
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Get the number of dependents.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.subscriber_count(self.inner.id))
    }

    /// Get the number of dependencies recorded by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.source_count(self.inner.id))
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a computed's value.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value, recomputing if necessary, without tracking.
    pub fn peek(&self) -> T {
        self.with_untracked(T::clone)
    }

    /// Like [`get`](Self::get), but reports a cycle instead of panicking.
    pub fn try_get(&self) -> Result<T> {
        self.try_with(T::clone)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a computed in the current runtime.
pub fn computed<T: PartialEq + 'static>(f: impl Fn() -> T + 'static) -> Computed<T> {
    Computed::new(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
