//! Subscriber types for the reactive system.
//!
//! A subscriber is any computation that depends on reactive values: a
//! computed derivation or an effect body. The runtime only knows subscribers
//! by [`NodeId`]; this module holds the type-erased handle it uses to run one.

use std::rc::{Rc, Weak};

use crate::graph::NodeId;

/// A computation the runtime can re-run when its dependencies change.
pub(crate) trait Reactive {
    /// The graph node this computation is attached to.
    fn node_id(&self) -> NodeId;

    /// Run the computation once under tracking.
    ///
    /// Returns whether the observable result changed. Effects always
    /// report `true` when they actually ran.
    fn run(&self) -> bool;
}

/// How the runtime holds on to a subscriber.
///
/// Computeds are owned by the application handles that read them, so the
/// runtime only keeps a weak reference. Effects have no such handle and are
/// kept alive by the runtime until they are disposed.
pub(crate) enum Subscriber {
    Derived(Weak<dyn Reactive>),
    Effect(Rc<dyn Reactive>),
}

impl Subscriber {
    /// Get a strong handle, if the subscriber is still alive.
    pub(crate) fn upgrade(&self) -> Option<Rc<dyn Reactive>> {
        match self {
            Subscriber::Derived(weak) => weak.upgrade(),
            Subscriber::Effect(strong) => Some(Rc::clone(strong)),
        }
    }
}
