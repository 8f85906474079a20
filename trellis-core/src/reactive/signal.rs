//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    runtime records that context as a subscriber.
//!
//! 2. When a signal is written with a value that differs from the current
//!    one, every dependent is marked and the affected effects are flushed.
//!
//! 3. Writing a value equal to the current one does nothing at all.
//!
//! # Equality
//!
//! "Differs" is decided by the signal's equality function: `PartialEq` for
//! [`Signal::new`], or any `fn(&T, &T) -> bool` passed to
//! [`Signal::with_equals`] (for example `Rc::ptr_eq` for identity).
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A graph node ID (8 bytes)
//! - The value, behind a `RefCell`
//! - A weak handle to the runtime it was created in
//!
//! Subscribers live in the runtime's graph, not in the signal. A signal that
//! outlives its runtime still stores values but has nobody to notify.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use crate::error::Result;
use crate::graph::{Node, NodeId};

use super::runtime::{Runtime, WeakRuntime};

/// Equality test deciding whether a write changed a value.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

struct SignalInner<T> {
    id: NodeId,
    runtime: WeakRuntime,
    value: RefCell<T>,
    equals: EqualsFn<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove_node(self.id);
        }
    }
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// assert_eq!(count.peek(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_equals(value, T::eq)
    }
}

impl<T: 'static> Signal<T> {
    /// Create a signal that uses `equals` to detect changes.
    pub fn with_equals(value: T, equals: EqualsFn<T>) -> Self {
        let runtime = Runtime::current();
        let id = runtime.add_node(Node::source());
        Self {
            inner: Rc::new(SignalInner {
                id,
                runtime: runtime.downgrade(),
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// Get the signal's graph node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Borrow the current value.
    ///
    /// Tracked like [`get`](Self::get). Writing to this same signal from
    /// inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id);
        }
        f(&*self.inner.value.borrow())
    }

    /// Borrow the current value without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.borrow())
    }

    /// Set a new value and notify subscribers.
    ///
    /// A value equal to the current one is a no-op: nothing is marked and
    /// no effect runs.
    ///
    /// # Panics
    ///
    /// Panics if the resulting flush hits a safety bound; see
    /// [`try_set`](Self::try_set).
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Set a new value, reporting a failed flush as an error.
    ///
    /// The value is stored even when the flush fails.
    pub fn try_set(&self, value: T) -> Result<()> {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            if (self.inner.equals)(&*current, &value) {
                false
            } else {
                *current = value;
                true
            }
        };

        match self.inner.runtime.upgrade() {
            Some(runtime) if changed => runtime.notify_changed(self.inner.id),
            _ => Ok(()),
        }
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value. The
    /// read of the current value is untracked.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&*self.inner.value.borrow());
        self.set(next);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.subscriber_count(self.inner.id))
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a signal in the current runtime.
pub fn signal<T: PartialEq + 'static>(initial: T) -> Signal<T> {
    Signal::new(initial)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
