//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds,
//! and effects. It owns the dependency graph, the observer stack, the
//! cleanup-scope arena and the batch state, and it schedules updates when
//! signals change.
//!
//! # How It Works
//!
//! 1. When a signal, computed or effect is created, it registers a node
//!    with the runtime that is current at that moment, and keeps using that
//!    runtime for the rest of its life.
//!
//! 2. When a computed or effect reads a signal, the runtime records the
//!    dependency.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct dependents dirty and everything further down "check"
//!    b. Queues the affected effects
//!    c. Flushes the queue right away, unless a batch is open
//!    d. Computeds are lazy - they recompute on next access
//!
//! # Isolation
//!
//! Each thread lazily creates a default runtime. Independent runtimes (for
//! example one per server-side render) are built with [`Runtime::new`] and
//! made current with [`Runtime::enter`]. A runtime is single-threaded: its
//! handles are `!Send`.
//!
//! Signals, computeds, effects and scopes only hold a weak reference to
//! their runtime. Once the last [`Runtime`] handle (and any guard that made
//! it current) is gone, the graph is freed along with every effect still in
//! it; remaining cleanups are dropped without running. Handles that outlive
//! their runtime keep their value but notify nobody.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{DirtyState, Node, NodeId, NodeKind, UpdateScheduler};

use super::scope::ScopeArena;
use super::subscriber::Subscriber;

thread_local! {
    static CURRENT: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

pub(crate) struct RuntimeInner {
    pub(super) config: RuntimeConfig,
    pub(super) scheduler: RefCell<UpdateScheduler>,
    pub(super) subscribers: RefCell<HashMap<NodeId, Subscriber>>,
    pub(super) observers: RefCell<Vec<Option<NodeId>>>,
    pub(super) scopes: RefCell<ScopeArena>,
    batch_depth: Cell<usize>,
    flushing: Cell<bool>,
    update_depth: Cell<usize>,
}

/// Handle to a reactive runtime.
///
/// Cloning the handle is cheap; all clones refer to the same graph.
#[derive(Clone)]
pub struct Runtime {
    pub(super) inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create an isolated runtime with the given limits.
    pub fn new(config: RuntimeConfig) -> Self {
        debug!(?config, "creating reactive runtime");
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                scheduler: RefCell::new(UpdateScheduler::new()),
                subscribers: RefCell::new(HashMap::new()),
                observers: RefCell::new(Vec::new()),
                scopes: RefCell::new(ScopeArena::default()),
                batch_depth: Cell::new(0),
                flushing: Cell::new(false),
                update_depth: Cell::new(0),
            }),
        }
    }

    /// The runtime that is current on this thread.
    ///
    /// Creates a default runtime the first time it is called on a thread.
    pub fn current() -> Self {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(Runtime::default)
                .clone()
        })
    }

    /// Make this runtime current on this thread until the guard is dropped.
    ///
    /// Primitives created while the guard is alive belong to this runtime.
    pub fn enter(&self) -> RuntimeGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        RuntimeGuard { previous }
    }

    /// The limits this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    /// Whether reads are currently attributed to a running computation.
    pub fn is_tracking(&self) -> bool {
        self.observer().is_some()
    }

    /// Number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.scheduler.borrow().node_count()
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.scheduler.borrow().pending_count()
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Run `f` as a batch: writes inside it are flushed once, when the
    /// outermost batch returns.
    ///
    /// # Panics
    ///
    /// Panics if the flush hits a safety bound; see [`try_batch`](Self::try_batch).
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.try_batch(f) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`batch`](Self::batch), but reports a failed flush as an error.
    ///
    /// If `f` panics the batch depth is restored and the queued effects stay
    /// pending until the next flush.
    pub fn try_batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let value = {
            let _batch = BatchGuard::enter(&self.inner);
            f()
        };
        if self.inner.batch_depth.get() == 0 {
            self.flush()?;
        }
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Graph bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn add_node(&self, node: Node) -> NodeId {
        self.inner.scheduler.borrow_mut().add_node(node)
    }

    pub(crate) fn register(&self, id: NodeId, subscriber: Subscriber) {
        self.inner.subscribers.borrow_mut().insert(id, subscriber);
    }

    /// Remove a node and its edges.
    ///
    /// Called from `Drop` impls, so it tolerates a graph that is already
    /// borrowed (the node is then left for the owner of the borrow).
    pub(crate) fn remove_node(&self, id: NodeId) {
        if let Ok(mut scheduler) = self.inner.scheduler.try_borrow_mut() {
            scheduler.remove_node(id);
        }
        // Dropping an effect's closure may drop further handles, which call
        // back in here; release the map before that happens.
        let removed = match self.inner.subscribers.try_borrow_mut() {
            Ok(mut subscribers) => subscribers.remove(&id),
            Err(_) => None,
        };
        drop(removed);
    }

    pub(crate) fn begin_run(&self, id: NodeId) {
        self.inner.scheduler.borrow_mut().begin_run(id);
    }

    pub(crate) fn end_run(&self, id: NodeId, completed: bool) {
        self.inner.scheduler.borrow_mut().end_run(id, completed);
    }

    pub(crate) fn push_observer(&self, observer: Option<NodeId>) {
        self.inner.observers.borrow_mut().push(observer);
    }

    pub(crate) fn pop_observer(&self) -> Option<Option<NodeId>> {
        self.inner.observers.borrow_mut().pop()
    }

    /// The computation reads are currently attributed to.
    pub(crate) fn observer(&self) -> Option<NodeId> {
        self.inner.observers.borrow().last().copied().flatten()
    }

    /// Link `source` to the current observer, if there is one.
    pub(crate) fn track(&self, source: NodeId) {
        if let Some(observer) = self.observer() {
            if observer != source {
                self.inner.scheduler.borrow_mut().track(source, observer);
            }
        }
    }

    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map_or(0, Node::subscriber_count)
    }

    pub(crate) fn source_count(&self, id: NodeId) -> usize {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map_or(0, |node| node.sources().len())
    }

    pub(crate) fn state(&self, id: NodeId) -> Option<DirtyState> {
        self.inner.scheduler.borrow().state(id)
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// A source changed: mark downstream nodes and flush unless batching.
    pub(crate) fn notify_changed(&self, source: NodeId) -> Result<()> {
        self.inner.scheduler.borrow_mut().mark_changed(source);
        if self.inner.batch_depth.get() == 0 {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Bring a computed up to date before it is read.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<()> {
        if self.inner.scheduler.borrow().is_running(id) {
            return Err(Error::Cycle { node: id });
        }
        self.update_if_necessary(id)
    }

    /// Run every pending effect until the queue settles.
    ///
    /// A flush started while another one is running returns immediately;
    /// the outer flush picks up whatever was queued.
    fn flush(&self) -> Result<()> {
        if self.inner.flushing.get() {
            return Ok(());
        }
        let _current = self.enter();
        let _flushing = FlushGuard::enter(&self.inner);
        let max_rounds = self.inner.config.max_flush_rounds;
        let mut rounds = 0;

        loop {
            let round = self.inner.scheduler.borrow_mut().take_pending();
            if round.is_empty() {
                return Ok(());
            }

            rounds += 1;
            if rounds > max_rounds {
                self.inner.scheduler.borrow_mut().clear_pending();
                warn!(rounds = max_rounds, "flush aborted, effects did not settle");
                return Err(Error::FlushLimitExceeded { rounds: max_rounds });
            }
            trace!(round = rounds, effects = round.len(), "flushing effects");

            let mut queue = Requeue {
                inner: &self.inner,
                queue: VecDeque::from(round),
            };
            while let Some(&id) = queue.queue.front() {
                let result = self.update_if_necessary(id);
                queue.queue.pop_front();
                result?;
            }
        }
    }

    /// Pull a node up to date, running it only if one of its sources
    /// really changed.
    fn update_if_necessary(&self, id: NodeId) -> Result<()> {
        let _depth = DepthGuard::enter(&self.inner)?;

        let sources: SmallVec<[NodeId; 8]> = {
            let scheduler = self.inner.scheduler.borrow();
            match scheduler.get_node(id) {
                Some(node) if node.dirty_state() == DirtyState::Check => {
                    node.sources().iter().copied().collect()
                }
                Some(_) => SmallVec::new(),
                None => return Ok(()),
            }
        };

        for source in sources {
            if self.inner.scheduler.borrow().kind(source) == Some(NodeKind::Derived) {
                self.update_if_necessary(source)?;
            }
            if self.state(id) == Some(DirtyState::Dirty) {
                break;
            }
        }

        match self.state(id) {
            Some(DirtyState::Dirty) => self.run_node(id),
            Some(DirtyState::Check) => {
                self.inner.scheduler.borrow_mut().mark_clean(id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn run_node(&self, id: NodeId) -> Result<()> {
        let subscriber = self
            .inner
            .subscribers
            .borrow()
            .get(&id)
            .and_then(Subscriber::upgrade);
        let Some(subscriber) = subscriber else {
            // The owner went away without removing its node.
            self.inner.scheduler.borrow_mut().remove_node(id);
            return Ok(());
        };
        debug_assert_eq!(subscriber.node_id(), id);

        let kind = self.inner.scheduler.borrow().kind(id);
        match kind {
            Some(NodeKind::Effect) => {
                // Clean before running: a write made by the body itself
                // queues the effect again.
                self.inner.scheduler.borrow_mut().mark_clean(id);
                subscriber.run();
            }
            Some(NodeKind::Derived) => {
                let changed = subscriber.run();
                let mut scheduler = self.inner.scheduler.borrow_mut();
                scheduler.mark_clean(id);
                if changed {
                    scheduler.mark_subscribers_dirty(id);
                }
            }
            Some(NodeKind::Source) | None => {}
        }
        Ok(())
    }
}

/// Non-owning handle to a runtime.
///
/// Everything the runtime stores (effects, cleanups) reaches back to it
/// through this, so the graph never keeps itself alive.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("node_count", &self.node_count())
            .field("pending_count", &self.pending_count())
            .field("batch_depth", &self.inner.batch_depth.get())
            .finish()
    }
}

/// Guard returned by [`Runtime::enter`]. Restores the previously current
/// runtime when dropped.
#[must_use = "the runtime is only current while the guard is alive"]
pub struct RuntimeGuard {
    previous: Option<Runtime>,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

struct BatchGuard<'a> {
    inner: &'a RuntimeInner,
}

impl<'a> BatchGuard<'a> {
    fn enter(inner: &'a RuntimeInner) -> Self {
        inner.batch_depth.set(inner.batch_depth.get() + 1);
        Self { inner }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.inner.batch_depth.set(self.inner.batch_depth.get() - 1);
    }
}

struct FlushGuard<'a> {
    inner: &'a RuntimeInner,
}

impl<'a> FlushGuard<'a> {
    fn enter(inner: &'a RuntimeInner) -> Self {
        inner.flushing.set(true);
        Self { inner }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.inner.flushing.set(false);
    }
}

struct DepthGuard<'a> {
    inner: &'a RuntimeInner,
}

impl<'a> DepthGuard<'a> {
    fn enter(inner: &'a RuntimeInner) -> Result<Self> {
        let depth = inner.update_depth.get() + 1;
        let limit = inner.config.max_update_depth;
        if depth > limit {
            return Err(Error::DepthExceeded { limit });
        }
        inner.update_depth.set(depth);
        Ok(Self { inner })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.inner.update_depth.set(self.inner.update_depth.get() - 1);
    }
}

/// The rest of a flush round. Whatever is left when it drops (because an
/// effect panicked or failed) goes back into the pending set.
struct Requeue<'a> {
    inner: &'a RuntimeInner,
    queue: VecDeque<NodeId>,
}

impl Drop for Requeue<'_> {
    fn drop(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        if let Ok(mut scheduler) = self.inner.scheduler.try_borrow_mut() {
            scheduler.requeue(self.queue.drain(..));
        }
    }
}
