//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds,
//! effects, batching and cleanup scopes. These primitives form the
//! foundation of Trellis's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or effect), the signal
//! automatically registers that context as a dependent. When the signal's
//! value changes, all dependents are notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and only when it is read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as updating the DOM or logging.
//!
//! ## Scopes
//!
//! A scope collects teardown callbacks and disposes them last-in first-out.
//! Effects, watches and mount callbacks belong to the scope that was active
//! when they were created.
//!
//! # Guarantees
//!
//! - An effect runs at most once per flush, however many of its sources
//!   changed (diamonds included).
//! - Writing a value equal to the current one notifies nobody.
//! - No effect ever reads a derived value that is out of date.
//!
//! # Implementation Notes
//!
//! Each runtime keeps an observer stack to detect dependencies automatically.
//! When a signal is read, we check if there is a running computation and, if
//! so, record the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod computed;
mod context;
mod effect;
mod liveness;
mod runtime;
mod scope;
mod signal;
mod subscriber;

pub use computed::{computed, Computed};
pub use context::untrack;
pub use effect::{effect, watch, Dispose};
pub use liveness::{liveness, Liveness};
pub use runtime::{Runtime, RuntimeGuard};
pub use scope::{
    on_cleanup, on_mount, pop_scope, push_scope, run_cleanups, Cleanup, IntoCleanup, ScopeHandle,
    ScopeId,
};
pub use signal::{signal, EqualsFn, Signal};

/// Run `f` as a batch in the current runtime.
///
/// Writes inside `f` are coalesced: each affected effect runs once, after
/// the outermost batch returns. Nested batches share that single flush.
///
/// # Panics
///
/// Panics if the flush hits a safety bound; use [`try_batch`] to get the
/// error instead.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().batch(f)
}

/// Like [`batch`], but reports a failed flush as an error.
pub fn try_batch<R>(f: impl FnOnce() -> R) -> crate::Result<R> {
    Runtime::current().try_batch(f)
}
