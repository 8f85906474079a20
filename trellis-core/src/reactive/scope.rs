//! Cleanup Scopes
//!
//! A scope is a LIFO list of teardown callbacks. Scopes nest: effects,
//! `watch` and `on_mount` all register their own disposal on the scope that
//! is active when they are created, so disposing a scope tears down
//! everything created under it, last registered first.
//!
//! Scopes live in a generational arena owned by the runtime. Disposing a
//! scope bumps its slot's generation, which is what lets a [`Liveness`]
//! token notice that the scope it was captured in is gone.
//!
//! Registering a cleanup when no scope is active, or on a scope that was
//! already disposed, is a silent no-op.
//!
//! [`Liveness`]: super::Liveness

use std::fmt;

use indexmap::IndexMap;
use tracing::trace;

use super::context::untrack;
use super::runtime::{Runtime, WeakRuntime};

/// A teardown callback.
pub type Cleanup = Box<dyn FnOnce()>;

/// Identity of a scope within its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    index: u32,
    generation: u32,
}

/// One registered cleanup, so that it can be withdrawn before the scope
/// is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CleanupKey {
    scope: ScopeId,
    seq: u64,
}

struct ScopeFrame {
    cleanups: IndexMap<u64, Cleanup>,
    next_seq: u64,
    parent: Option<ScopeId>,
    disposing: bool,
}

struct ScopeSlot {
    generation: u32,
    frame: Option<ScopeFrame>,
}

/// Storage for every scope of a runtime, plus the active-scope stack.
#[derive(Default)]
pub(crate) struct ScopeArena {
    slots: Vec<ScopeSlot>,
    free: Vec<u32>,
    stack: Vec<ScopeId>,
}

impl ScopeArena {
    pub(crate) fn create(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let frame = ScopeFrame {
            cleanups: IndexMap::new(),
            next_seq: 0,
            parent,
            disposing: false,
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.frame = Some(frame);
                ScopeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(ScopeSlot {
                    generation: 0,
                    frame: Some(frame),
                });
                ScopeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn frame(&self, id: ScopeId) -> Option<&ScopeFrame> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.frame.as_ref())
    }

    fn frame_mut(&mut self, id: ScopeId) -> Option<&mut ScopeFrame> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.frame.as_mut())
    }

    pub(crate) fn is_live(&self, id: ScopeId) -> bool {
        self.frame(id).is_some()
    }

    /// Whether `id` and every scope it was created under are still live.
    pub(crate) fn is_live_chain(&self, id: ScopeId) -> bool {
        let mut next = Some(id);
        while let Some(id) = next {
            match self.frame(id) {
                Some(frame) => next = frame.parent,
                None => return false,
            }
        }
        true
    }

    pub(crate) fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.frame(id).and_then(|frame| frame.parent)
    }

    pub(crate) fn cleanup_count(&self, id: ScopeId) -> usize {
        self.frame(id).map_or(0, |frame| frame.cleanups.len())
    }

    /// Append a cleanup. Hands it back if the scope no longer accepts any.
    pub(crate) fn push_cleanup(
        &mut self,
        id: ScopeId,
        cleanup: Cleanup,
    ) -> Result<CleanupKey, Cleanup> {
        match self.frame_mut(id) {
            Some(frame) if !frame.disposing => {
                let seq = frame.next_seq;
                frame.next_seq += 1;
                frame.cleanups.insert(seq, cleanup);
                Ok(CleanupKey { scope: id, seq })
            }
            _ => Err(cleanup),
        }
    }

    /// Take a cleanup back out without running it.
    pub(crate) fn remove_cleanup(&mut self, key: CleanupKey) -> Option<Cleanup> {
        self.frame_mut(key.scope)
            .and_then(|frame| frame.cleanups.shift_remove(&key.seq))
    }

    /// Start disposing: from now on the scope refuses new cleanups.
    fn begin_dispose(&mut self, id: ScopeId) -> bool {
        match self.frame_mut(id) {
            Some(frame) => {
                frame.disposing = true;
                true
            }
            None => false,
        }
    }

    fn pop_cleanup(&mut self, id: ScopeId) -> Option<Cleanup> {
        self.frame_mut(id)
            .and_then(|frame| frame.cleanups.pop())
            .map(|(_, cleanup)| cleanup)
    }

    /// Free the slot and bump its generation. Returns the frame, whose
    /// remaining cleanups the caller drops without running.
    fn retire(&mut self, id: ScopeId) -> Option<ScopeFrame> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let frame = slot.frame.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(frame)
    }

    pub(crate) fn current(&self) -> Option<ScopeId> {
        self.stack.last().copied()
    }

    pub(crate) fn push(&mut self, id: ScopeId) {
        self.stack.push(id);
    }

    pub(crate) fn pop(&mut self) -> Option<ScopeId> {
        self.stack.pop()
    }
}

impl Runtime {
    /// The innermost active scope, if any.
    pub(crate) fn current_scope(&self) -> Option<ScopeId> {
        self.inner.scopes.borrow().current()
    }

    pub(crate) fn create_scope(&self, parent: Option<ScopeId>) -> ScopeId {
        self.inner.scopes.borrow_mut().create(parent)
    }

    /// Make `id` the active scope until the guard drops.
    pub(crate) fn enter_scope(&self, id: ScopeId) -> ScopeGuard {
        self.inner.scopes.borrow_mut().push(id);
        ScopeGuard {
            runtime: self.clone(),
        }
    }

    /// Register a cleanup on a specific scope.
    pub(crate) fn register_cleanup(&self, id: ScopeId, cleanup: Cleanup) -> Option<CleanupKey> {
        let pushed = self.inner.scopes.borrow_mut().push_cleanup(id, cleanup);
        match pushed {
            Ok(key) => Some(key),
            Err(cleanup) => {
                trace!(?id, "cleanup registered on a disposed scope, ignoring");
                drop(cleanup);
                None
            }
        }
    }

    /// Withdraw a cleanup that is no longer needed. Does nothing if it
    /// already ran or its scope is gone.
    pub(crate) fn withdraw_cleanup(&self, key: CleanupKey) {
        let removed = self.inner.scopes.borrow_mut().remove_cleanup(key);
        drop(removed);
    }

    /// Register a cleanup on the active scope, if there is one.
    pub(crate) fn on_cleanup(&self, cleanup: Cleanup) {
        match self.current_scope() {
            Some(id) => {
                self.register_cleanup(id, cleanup);
            }
            None => trace!("on_cleanup called with no active scope, ignoring"),
        }
    }

    /// Run a scope's cleanups, last registered first, then dispose it.
    ///
    /// Each cleanup is removed before it runs. If one panics, the ones
    /// registered before it stay in place and the scope stays live, so a
    /// later call picks up where this one stopped.
    pub(crate) fn run_cleanups(&self, id: ScopeId) {
        if !self.inner.scopes.borrow_mut().begin_dispose(id) {
            return;
        }
        let _current = self.enter();
        let mut ran = 0usize;
        loop {
            let next = self.inner.scopes.borrow_mut().pop_cleanup(id);
            match next {
                Some(cleanup) => {
                    cleanup();
                    ran += 1;
                }
                None => break,
            }
        }
        let retired = self.inner.scopes.borrow_mut().retire(id);
        drop(retired);
        trace!(?id, cleanups = ran, "scope disposed");
    }

    /// Dispose a scope without running its cleanups.
    pub(crate) fn discard_scope(&self, id: ScopeId) {
        let retired = self.inner.scopes.borrow_mut().retire(id);
        drop(retired);
    }

    pub(crate) fn scope_is_live(&self, id: ScopeId) -> bool {
        self.inner.scopes.borrow().is_live(id)
    }

    pub(crate) fn scope_chain_is_live(&self, id: ScopeId) -> bool {
        self.inner.scopes.borrow().is_live_chain(id)
    }

    pub(crate) fn scope_parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.inner.scopes.borrow().parent(id)
    }

    pub(crate) fn scope_cleanup_count(&self, id: ScopeId) -> usize {
        self.inner.scopes.borrow().cleanup_count(id)
    }
}

/// Pops the active scope when dropped.
pub(crate) struct ScopeGuard {
    runtime: Runtime,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.runtime.inner.scopes.borrow_mut().pop();
    }
}

/// Handle to a cleanup scope created with [`push_scope`].
///
/// The handle does not keep its runtime alive. Once the runtime is gone the
/// scope counts as disposed.
#[derive(Clone)]
pub struct ScopeHandle {
    runtime: WeakRuntime,
    id: ScopeId,
}

impl ScopeHandle {
    /// Create a scope under the active one without activating it.
    pub fn new() -> Self {
        let runtime = Runtime::current();
        let id = runtime.create_scope(runtime.current_scope());
        Self {
            runtime: runtime.downgrade(),
            id,
        }
    }

    /// The scope's identity.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The scope that was active when this one was created.
    pub fn parent(&self) -> Option<ScopeId> {
        self.runtime
            .upgrade()
            .and_then(|runtime| runtime.scope_parent(self.id))
    }

    /// Run `f` with this scope active, inside the runtime it belongs to.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.runtime.upgrade() {
            Some(runtime) => {
                let _current = runtime.enter();
                let _active = runtime.enter_scope(self.id);
                f()
            }
            None => f(),
        }
    }

    /// Run the scope's cleanups (LIFO) and dispose it. Idempotent.
    pub fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.run_cleanups(self.id);
        }
    }

    /// Whether the scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.runtime
            .upgrade()
            .map_or(true, |runtime| !runtime.scope_is_live(self.id))
    }

    /// Number of cleanups currently registered.
    pub fn cleanup_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.scope_cleanup_count(self.id))
    }
}

impl Default for ScopeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .field("cleanup_count", &self.cleanup_count())
            .finish()
    }
}

/// Create a new scope under the active one and make it active.
///
/// The scope stays active until [`pop_scope`]; popping does not dispose it.
pub fn push_scope() -> ScopeHandle {
    let runtime = Runtime::current();
    let id = runtime.create_scope(runtime.current_scope());
    runtime.inner.scopes.borrow_mut().push(id);
    ScopeHandle {
        runtime: runtime.downgrade(),
        id,
    }
}

/// Deactivate the innermost scope and restore the previous one.
///
/// The scope is not disposed; keep the handle from [`push_scope`] (or the
/// one returned here) and pass it to [`run_cleanups`] later.
pub fn pop_scope() -> Option<ScopeHandle> {
    let runtime = Runtime::current();
    let id = runtime.inner.scopes.borrow_mut().pop()?;
    Some(ScopeHandle {
        runtime: runtime.downgrade(),
        id,
    })
}

/// Run a scope's cleanups in reverse registration order and dispose it.
pub fn run_cleanups(scope: &ScopeHandle) {
    scope.dispose();
}

/// Register `f` to run when the active scope is disposed.
///
/// With no active scope this does nothing.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    Runtime::current().on_cleanup(Box::new(f));
}

/// Values an [`on_mount`] callback may return.
pub trait IntoCleanup {
    /// Convert into an optional teardown callback.
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

/// Run `f` once, untracked, in a fresh child scope.
///
/// Everything `f` registers (cleanups, effects, watches), plus the cleanup
/// it returns, lives in that child scope. If a scope was active, disposing
/// it disposes the child too; otherwise the child is dropped without
/// running anything.
///
/// ```rust,ignore
/// on_mount(|| {
///     let handle = start_timer();
///     Box::new(move || handle.cancel()) as Cleanup
/// });
/// ```
pub fn on_mount<F, R>(f: F)
where
    F: FnOnce() -> R,
    R: IntoCleanup,
{
    let runtime = Runtime::current();
    let parent = runtime.current_scope();
    let child = runtime.create_scope(parent);

    let returned = {
        let _active = runtime.enter_scope(child);
        untrack(f)
    };
    if let Some(cleanup) = returned.into_cleanup() {
        runtime.register_cleanup(child, cleanup);
    }

    match parent {
        Some(parent) => {
            let owner = runtime.downgrade();
            runtime.register_cleanup(
                parent,
                Box::new(move || {
                    if let Some(owner) = owner.upgrade() {
                        owner.run_cleanups(child);
                    }
                }),
            );
        }
        None => runtime.discard_scope(child),
    }
}
