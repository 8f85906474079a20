//! Liveness Tokens
//!
//! An effect or mount callback may start asynchronous work whose
//! continuation runs long after the callback returned. By then the scope
//! that owned the callback may have been disposed, and the continuation must
//! not touch state that was torn down with it.
//!
//! A [`Liveness`] token captures the active scope together with its arena
//! generation. Disposing the scope (or any scope it was created under) bumps
//! the generation, so the token can tell a late resumption apart from a
//! current one. The token never cancels the underlying work; it only lets the
//! continuation skip its effects.

use std::future::Future;

use super::runtime::{Runtime, WeakRuntime};
use super::scope::ScopeId;

/// Snapshot of the active scope, used to guard deferred continuations.
#[derive(Clone)]
pub struct Liveness {
    runtime: WeakRuntime,
    scope: Option<ScopeId>,
}

impl Liveness {
    /// Capture the scope that is active right now.
    ///
    /// Captured with no active scope, the token stays alive as long as its
    /// runtime does: nothing could ever dispose its owner.
    pub fn capture() -> Self {
        let runtime = Runtime::current();
        let scope = runtime.current_scope();
        Self {
            runtime: runtime.downgrade(),
            scope,
        }
    }

    /// The captured scope, if one was active.
    pub fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    /// Whether the captured scope and all of its ancestors are still live.
    pub fn is_alive(&self) -> bool {
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };
        match self.scope {
            Some(scope) => runtime.scope_chain_is_live(scope),
            None => true,
        }
    }

    /// Run `f` only if the captured scope is still live.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.is_alive() {
            Some(f())
        } else {
            None
        }
    }

    /// Await `future`, then yield its output only if the captured scope
    /// survived the wait.
    ///
    /// ```rust,ignore
    /// effect(move || {
    ///     let alive = liveness();
    ///     let target = target.clone();
    ///     spawn_local(async move {
    ///         if let Some(user) = alive.guard(fetch_user(id)).await {
    ///             target.set(Some(user));
    ///         }
    ///     });
    /// });
    /// ```
    pub async fn guard<F: Future>(self, future: F) -> Option<F::Output> {
        let output = future.await;
        self.is_alive().then_some(output)
    }
}

impl std::fmt::Debug for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Liveness")
            .field("scope", &self.scope)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Capture a [`Liveness`] token for the active scope.
pub fn liveness() -> Liveness {
    Liveness::capture()
}
